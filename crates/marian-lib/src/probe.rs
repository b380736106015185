//! Card bring-up: identify the variant, build the device, start the timer.
//!
//! Consolidates the sequence every front end runs for a newly found card:
//! variant lookup → descriptor check → revision check → construction →
//! presence detection → soft reset → controls → timer → state indication.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::controls::{ControlSink, NullControls};
use crate::device::{Device, DeviceError, DmaBuffer};
use crate::irq::{NullPeriods, PeriodSink};
use crate::monitor::TimerHandle;
use crate::protocol::MARIAN_VENDOR_ID;
use crate::regs::RegisterIo;
use crate::transport::Direction;
use crate::variant::{self, CardState, CardVariant};

/// PCI identity of a candidate card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PciIdentity {
    pub vendor: u16,
    pub device: u16,
    pub revision: u8,
    pub irq: Option<u32>,
}

/// Bring-up options.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Word clock scan source measured by the timer.
    pub clock_source: u32,
    /// Timer period; `None` uses the variant's interval.
    pub timer_interval: Option<Duration>,
    pub start_timer: bool,
    /// Drive the front-panel LED on success, failure and removal.
    pub indicate_state: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            clock_source: 0,
            timer_interval: None,
            start_timer: true,
            indicate_state: true,
        }
    }
}

/// Framework callbacks the device reports to.
#[derive(Clone)]
pub struct Sinks {
    pub periods: Arc<dyn PeriodSink>,
    pub controls: Arc<dyn ControlSink>,
}

impl Default for Sinks {
    fn default() -> Self {
        Self {
            periods: Arc::new(NullPeriods),
            controls: Arc::new(NullControls),
        }
    }
}

/// A card that passed bring-up.
pub struct Probed<R: RegisterIo + 'static> {
    pub device: Arc<Device<R>>,
    timer: Option<TimerHandle>,
    indicate_state: bool,
}

impl<R: RegisterIo + 'static> Probed<R> {
    pub fn timer_running(&self) -> bool {
        self.timer.as_ref().is_some_and(TimerHandle::is_running)
    }

    /// Tear down: stop the timer, quiesce the engine, show the reset state.
    pub fn remove(mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        self.device.soft_reset();
        if self.indicate_state {
            self.device.indicate_state(CardState::Reset);
        }
        log::info!("{}: removed", self.device.variant().name());
    }
}

/// Resolve and check the variant for a PCI identity.
pub fn identify(pci: &PciIdentity) -> Result<&'static dyn CardVariant, DeviceError> {
    let unknown = DeviceError::UnknownDevice {
        vendor: pci.vendor,
        device: pci.device,
    };
    if pci.vendor != MARIAN_VENDOR_ID {
        return Err(unknown);
    }
    let variant = variant::lookup_variant(pci.device).ok_or(unknown)?;
    variant.caps().validate()?;
    if !variant.hardware_revision_valid(pci.revision) {
        let (min, max) = variant.valid_revision_range();
        return Err(DeviceError::UnsupportedRevision {
            rev: pci.revision,
            min,
            max,
        });
    }
    Ok(variant)
}

/// Bring up one card.
///
/// `alloc` is called once per direction with the byte size the variant
/// needs. Any failure after the device exists is shown on the LED (when
/// enabled) before it is returned.
pub fn probe<R, A>(
    pci: &PciIdentity,
    regs: R,
    mut alloc: A,
    sinks: Sinks,
    opts: &ProbeOptions,
) -> crate::error::Result<Probed<R>>
where
    R: RegisterIo + 'static,
    A: FnMut(Direction, usize) -> DmaBuffer,
{
    let variant = identify(pci)?;
    let bytes = variant.caps().dma_buffer_bytes();

    let mut device = Device::new(
        regs,
        variant,
        alloc(Direction::Playback, bytes),
        alloc(Direction::Capture, bytes),
    )?
    .with_clock_source(opts.clock_source)
    .with_period_sink(sinks.periods)
    .with_control_sink(sinks.controls);
    if let Some(irq) = pci.irq {
        device = device.with_irq(irq);
    }

    let fail = |device: &Device<R>, err: crate::error::MarianError| {
        log::error!("{}: probe failed: {err}", variant.name());
        if opts.indicate_state {
            device.indicate_state(CardState::Failure);
        }
        err
    };

    if !device.detect_presence() {
        return Err(fail(&device, DeviceError::NotPresent.into()));
    }
    // Clear stale engine state before the interrupt line goes live.
    device.soft_reset();

    if let Err(e) = device.create_controls() {
        return Err(fail(&device, e.into()));
    }

    let device = Arc::new(device);
    let timer = if opts.start_timer {
        let interval = opts
            .timer_interval
            .unwrap_or_else(|| variant.timer_interval());
        match TimerHandle::spawn(Arc::clone(&device), interval) {
            Ok(t) => Some(t),
            Err(e) => return Err(fail(device.as_ref(), e.into())),
        }
    } else {
        None
    };

    if opts.indicate_state {
        device.indicate_state(CardState::Success);
    }
    log::info!(
        "{}: probed (rev {}, irq {:?})",
        variant.name(),
        pci.revision,
        pci.irq
    );
    Ok(Probed {
        device,
        timer,
        indicate_state: opts.indicate_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::mock::RecordingControls;
    use crate::error::MarianError;
    use crate::protocol::*;
    use crate::regs::Window;
    use crate::regs::mock::MockRegisters;

    fn clara_e(rev: u8) -> PciIdentity {
        PciIdentity {
            vendor: MARIAN_VENDOR_ID,
            device: CLARA_E_DEVICE_ID,
            revision: rev,
            irq: Some(42),
        }
    }

    fn present_regs() -> MockRegisters {
        let regs = MockRegisters::new();
        regs.set_input(Window::Control, ADDR_MAGIC_WORD, FPGA_MAGIC_WORD);
        regs
    }

    fn alloc(dir: Direction, bytes: usize) -> DmaBuffer {
        let base = match dir {
            Direction::Playback => 0x1000_0000,
            Direction::Capture => 0x2000_0000,
        };
        DmaBuffer::new(base, bytes)
    }

    fn no_timer() -> ProbeOptions {
        ProbeOptions {
            start_timer: false,
            ..ProbeOptions::default()
        }
    }

    #[test]
    fn identify_known_cards() {
        assert_eq!(identify(&clara_e(6)).unwrap().name(), "Clara E");
        let emin = PciIdentity {
            device: CLARA_EMIN_DEVICE_ID,
            revision: 4,
            ..clara_e(0)
        };
        assert_eq!(identify(&emin).unwrap().name(), "Clara Emin");
    }

    #[test]
    fn identify_rejects_foreign_vendor() {
        let pci = PciIdentity {
            vendor: 0x10EE,
            ..clara_e(6)
        };
        assert!(matches!(
            identify(&pci),
            Err(DeviceError::UnknownDevice { vendor: 0x10EE, .. })
        ));
    }

    #[test]
    fn identify_rejects_unknown_device() {
        let pci = PciIdentity {
            device: 0x9999,
            ..clara_e(6)
        };
        assert!(matches!(identify(&pci), Err(DeviceError::UnknownDevice { .. })));
    }

    #[test]
    fn identify_rejects_revision_out_of_range() {
        assert!(matches!(
            identify(&clara_e(5)),
            Err(DeviceError::UnsupportedRevision {
                rev: 5,
                min: 6,
                max: 6
            })
        ));
    }

    #[test]
    fn probe_success_sequence() {
        let controls = Arc::new(RecordingControls::new());
        let sinks = Sinks {
            controls: controls.clone(),
            ..Sinks::default()
        };
        let probed = probe(&clara_e(6), present_regs(), alloc, sinks, &no_timer()).unwrap();
        let dev = &probed.device;

        assert_eq!(dev.irq(), Some(42));
        assert_eq!(dev.buffer_bytes(Direction::Playback), 64 * 128 * 512);
        assert_eq!(dev.buffer_addr(Direction::Capture), 0x2000_0000);
        assert_eq!(controls.controls().len(), 1);
        assert_eq!(dev.regs().value(Window::Control, ADDR_LED), Some(1));
        assert_eq!(dev.regs().value(Window::Control, ADDR_PREPARE_RUN), Some(0));
        assert!(!probed.timer_running());
    }

    #[test]
    fn probe_without_fpga_indicates_failure() {
        let regs = MockRegisters::new();
        let err = match probe(&clara_e(6), regs, alloc, Sinks::default(), &no_timer()) {
            Err(e) => e,
            Ok(_) => panic!("probe should fail without magic word"),
        };
        assert!(matches!(err, MarianError::Device(DeviceError::NotPresent)));
    }

    #[test]
    fn probe_control_failure_is_reported() {
        let sinks = Sinks {
            controls: Arc::new(RecordingControls::failing("full")),
            ..Sinks::default()
        };
        match probe(&clara_e(6), present_regs(), alloc, sinks, &no_timer()) {
            Err(MarianError::Device(DeviceError::Control(msg))) => assert!(msg.contains("full")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("probe should fail"),
        }
    }

    #[test]
    fn probe_respects_indicate_state_off() {
        let opts = ProbeOptions {
            indicate_state: false,
            ..no_timer()
        };
        let probed = probe(&clara_e(6), present_regs(), alloc, Sinks::default(), &opts).unwrap();
        assert!(probed.device.regs().value(Window::Control, ADDR_LED).is_none());
    }

    #[test]
    fn remove_indicates_reset() {
        let probed =
            probe(&clara_e(6), present_regs(), alloc, Sinks::default(), &no_timer()).unwrap();
        let dev = Arc::clone(&probed.device);
        probed.remove();
        assert_eq!(dev.regs().value(Window::Control, ADDR_LED), Some(3));
    }

    #[test]
    fn probe_starts_timer() {
        let opts = ProbeOptions {
            timer_interval: Some(Duration::from_millis(5)),
            ..ProbeOptions::default()
        };
        let probed = probe(&clara_e(6), present_regs(), alloc, Sinks::default(), &opts).unwrap();
        assert!(probed.timer_running());
        probed.remove();
    }
}
