//! Rate monitor: periodic word clock measurement decoupled from I/O.
//!
//! [`RateMonitor`] holds the decision logic (did the external rate change?).
//! [`Device::timer_tick`] wires it to the hardware and the control sink, and
//! [`TimerHandle`] runs that tick on a dedicated thread at the variant's
//! interval.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::regs::RegisterIo;

/// Shortest pause between two ticks, even when a tick overran the interval.
pub const MIN_TIMER_SLEEP: Duration = Duration::from_millis(1);

/// Outcome of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    /// The external rate changed; `new` is 0 when the clock disappeared.
    Changed { old: u32, new: u32 },
    NoChange,
}

impl RateAction {
    pub fn between(old: u32, new: u32) -> Self {
        if old == new {
            RateAction::NoChange
        } else {
            RateAction::Changed { old, new }
        }
    }
}

/// Tracks the last measured rate. A missing clock counts as 0 Hz.
#[derive(Debug, Clone, Default)]
pub struct RateMonitor {
    current: u32,
}

impl RateMonitor {
    pub fn new(initial_hz: u32) -> Self {
        Self {
            current: initial_hz,
        }
    }

    pub fn tick(&mut self, measured: Option<u32>) -> RateAction {
        let new = measured.unwrap_or(0);
        let action = RateAction::between(self.current, new);
        self.current = new;
        action
    }

    pub fn current(&self) -> u32 {
        self.current
    }
}

impl<R: RegisterIo> Device<R> {
    /// One maintenance cycle: measure the word clock, publish a changed rate
    /// and refresh the cached clock mode. Never takes the device lock.
    pub fn timer_tick(&self) -> RateAction {
        let measured = self.measure_clock();
        let action = RateMonitor::new(self.current_rate()).tick(measured);

        if let RateAction::Changed { new, .. } = action {
            self.set_current_rate(new);
            self.notify_sample_rate_changed();
            log::info!("{}: new sample rate: {new}", self.variant.name());
        }
        if let Some(mode) = self.variant.read_clock_mode(&self.regs) {
            self.set_clock_mode(mode);
        }
        action
    }
}

// ── Timer thread ──

/// Handle to the periodic timer thread. Stops and joins on drop.
pub struct TimerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Spawn a thread calling [`Device::timer_tick`] every `interval`.
    pub fn spawn<R>(device: Arc<Device<R>>, interval: Duration) -> io::Result<Self>
    where
        R: RegisterIo + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("marian-timer".into())
            .spawn(move || {
                log::debug!("timer thread started");
                while !flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    device.timer_tick();
                    let pause = interval
                        .saturating_sub(started.elapsed())
                        .max(MIN_TIMER_SLEEP);
                    let deadline = Instant::now() + pause;
                    // park_timeout may wake early; sleep out the remainder
                    while !flag.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }
                log::debug!("timer thread stopped");
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("timer thread panicked");
            }
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
