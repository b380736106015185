//! Card controls exposed to the host mixer interface.
//!
//! The only control is the read-only "Sample Rate", whose value tracks the
//! measured external word clock. The timer notifies the sink with the new
//! value whenever the measurement changes.

use serde::Serialize;

use crate::device::{Device, DeviceError, Result};
use crate::regs::RegisterIo;

/// Identifier handed out by the control sink on registration.
pub type ControlId = u32;

pub const SAMPLE_RATE_CONTROL_NAME: &str = "Sample Rate";

/// Static description of one integer control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlInfo {
    pub name: &'static str,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub read_only: bool,
    /// Value may change without a write (hardware-driven).
    pub volatile: bool,
}

pub const SAMPLE_RATE_CONTROL: ControlInfo = ControlInfo {
    name: SAMPLE_RATE_CONTROL_NAME,
    min: 22050,
    max: 192000,
    step: 1,
    read_only: true,
    volatile: true,
};

/// Registration and change notification for card controls.
pub trait ControlSink: Send + Sync {
    fn add_control(&self, info: &ControlInfo) -> Result<ControlId>;
    /// `value` is the control's value as read through
    /// [`Device::control_value`] at notification time.
    fn notify_value_changed(&self, id: ControlId, value: i64);
}

/// Sink that accepts every control and drops notifications.
#[derive(Debug, Default)]
pub struct NullControls;

impl ControlSink for NullControls {
    fn add_control(&self, _info: &ControlInfo) -> Result<ControlId> {
        Ok(0)
    }

    fn notify_value_changed(&self, _id: ControlId, _value: i64) {}
}

impl<R: RegisterIo> Device<R> {
    /// Register the card controls with the control sink.
    pub fn create_controls(&self) -> Result<()> {
        let id = self.control_sink.add_control(&SAMPLE_RATE_CONTROL)?;
        self.ctl_sample_rate
            .set(id)
            .map_err(|_| DeviceError::Control("Sample Rate: already registered".into()))?;
        log::debug!("{}: sample rate control id {id}", self.variant.name());
        Ok(())
    }

    pub fn sample_rate_control_id(&self) -> Option<ControlId> {
        self.ctl_sample_rate.get().copied()
    }

    /// Current value of a registered control.
    pub fn control_value(&self, id: ControlId) -> Option<i64> {
        if self.sample_rate_control_id() == Some(id) {
            Some(i64::from(self.current_rate()))
        } else {
            None
        }
    }

    pub(crate) fn notify_sample_rate_changed(&self) {
        if let Some(id) = self.sample_rate_control_id()
            && let Some(value) = self.control_value(id)
        {
            self.control_sink.notify_value_changed(id, value);
        }
    }
}

pub mod mock {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[derive(Debug, Default)]
    struct State {
        controls: Vec<ControlInfo>,
        notifications: Vec<(ControlId, i64)>,
        fail_with: Option<String>,
    }

    /// Control sink that records registrations and notifications.
    /// Ids start at 1.
    #[derive(Debug, Default)]
    pub struct RecordingControls {
        state: Mutex<State>,
    }

    impl RecordingControls {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every later registration fail.
        pub fn failing(reason: &str) -> Self {
            let sink = Self::default();
            sink.state().fail_with = Some(reason.to_string());
            sink
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn controls(&self) -> Vec<ControlInfo> {
            self.state().controls.clone()
        }

        /// `(id, value)` pairs in notification order.
        pub fn notifications(&self) -> Vec<(ControlId, i64)> {
            self.state().notifications.clone()
        }
    }

    impl ControlSink for RecordingControls {
        fn add_control(&self, info: &ControlInfo) -> Result<ControlId> {
            let mut st = self.state();
            if let Some(reason) = &st.fail_with {
                return Err(DeviceError::Control(format!("{}: {reason}", info.name)));
            }
            st.controls.push(info.clone());
            Ok(st.controls.len() as ControlId)
        }

        fn notify_value_changed(&self, id: ControlId, value: i64) {
            self.state().notifications.push((id, value));
        }
    }
}
