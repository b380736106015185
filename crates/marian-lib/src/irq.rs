//! Interrupt handling for the shared PCI line.

use std::sync::atomic::Ordering;

use crate::device::Device;
use crate::protocol::*;
use crate::regs::RegisterIo;
use crate::transport::{self, Direction};

/// Outcome reported back to the interrupt dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    Handled,
    /// Status was 0: another device on the shared line raised it.
    NotMine,
}

/// Receives "one period elapsed" notifications. Called from interrupt
/// context, so implementations must not block.
pub trait PeriodSink: Send + Sync {
    fn period_elapsed(&self, direction: Direction);
}

/// Sink that drops every notification.
#[derive(Debug, Default)]
pub struct NullPeriods;

impl PeriodSink for NullPeriods {
    fn period_elapsed(&self, _direction: Direction) {}
}

impl<R: RegisterIo> Device<R> {
    /// Interrupt handler. Reads the status word once and never takes the
    /// device lock.
    pub fn on_interrupt(&self) -> IrqReturn {
        let status = self.regs.read_control(ADDR_STATUS);
        if status == 0 {
            return IrqReturn::NotMine;
        }
        if status & MASK_IRQ_STATUS_PREPARED != 0 {
            log::debug!("prepare IRQ (status 0x{status:08X})");
        }

        let playback = self.is_attached(Direction::Playback);
        let capture = self.is_attached(Direction::Capture);

        // Both directions share the capture period boundary.
        if status & MASK_IRQ_STATUS_CAPTURE != 0 {
            if playback {
                self.period_sink.period_elapsed(Direction::Playback);
            }
            if capture {
                self.period_sink.period_elapsed(Direction::Capture);
            }
        }

        if !playback && !capture {
            transport::disable_interrupts(&self.regs);
            self.dangling_irqs.fetch_add(1, Ordering::Relaxed);
            log::error!("caught dangling IRQ (status 0x{status:08X})");
        }
        IrqReturn::Handled
    }
}

pub mod mock {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// Records every period notification in arrival order.
    #[derive(Debug, Default)]
    pub struct RecordingPeriods {
        events: Mutex<Vec<Direction>>,
    }

    impl RecordingPeriods {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Direction> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn count(&self, direction: Direction) -> usize {
            self.events().iter().filter(|&&d| d == direction).count()
        }
    }

    impl PeriodSink for RecordingPeriods {
        fn period_elapsed(&self, direction: Direction) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(direction);
        }
    }
}
