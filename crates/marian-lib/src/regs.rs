//! Register access: trait + in-memory mock backend.
//!
//! Every hardware interaction in the crate goes through [`RegisterIo`]:
//! single 32-bit accesses to one of two memory windows. Implementations
//! must not retry, buffer or block; sequencing is the caller's job.

use std::fmt;

use serde::Serialize;

/// One of the two memory-mapped register windows of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    /// FPGA control registers (BAR0).
    Control,
    /// PCIe DMA core registers (BAR1).
    Transport,
}

impl Window {
    /// PCI BAR index backing this window.
    pub fn bar_index(self) -> u8 {
        match self {
            Window::Control => 0,
            Window::Transport => 1,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Control => write!(f, "control"),
            Window::Transport => write!(f, "transport"),
        }
    }
}

// ── Trait ──

/// Uncached 32-bit register access over the control and transport windows.
///
/// Both the interrupt path and process context call into this concurrently,
/// so implementations must be `Send + Sync`. Individual accesses are atomic
/// at the bus level; no multi-register sequence needs cross-context locking.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, window: Window, offset: u32) -> u32;
    fn write32(&self, window: Window, offset: u32, value: u32);

    fn read_control(&self, offset: u32) -> u32 {
        self.read32(Window::Control, offset)
    }

    fn write_control(&self, offset: u32, value: u32) {
        self.write32(Window::Control, offset, value)
    }

    fn write_transport(&self, offset: u32, value: u32) {
        self.write32(Window::Transport, offset, value)
    }
}

/// Boxed backends, for front ends that pick the backend at run time.
impl<T: RegisterIo + ?Sized> RegisterIo for Box<T> {
    fn read32(&self, window: Window, offset: u32) -> u32 {
        (**self).read32(window, offset)
    }

    fn write32(&self, window: Window, offset: u32, value: u32) {
        (**self).write32(window, offset, value)
    }
}

/// Split a 64-bit host address into the `(low, high)` register words.
pub fn split_addr(addr: u64) -> (u32, u32) {
    ((addr & 0xFFFF_FFFF) as u32, (addr >> 32) as u32)
}

// ── Mock (for tests) ──

pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// A single recorded register write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegWrite {
        pub window: Window,
        pub offset: u32,
        pub value: u32,
    }

    #[derive(Default)]
    struct MockState {
        /// Last value written per register.
        values: HashMap<(Window, u32), u32>,
        /// Hardware-driven values; reads see these instead of written values.
        inputs: HashMap<(Window, u32), u32>,
        /// One-shot read values, consumed before `inputs`.
        scripted: HashMap<(Window, u32), VecDeque<u32>>,
        writes: Vec<RegWrite>,
        reads: Vec<(Window, u32)>,
    }

    /// In-memory register file for unit tests.
    ///
    /// Reads resolve in order: scripted one-shot values, then hardware inputs,
    /// then the last written value, then 0. Registers whose read and write
    /// meanings differ (status vs. reset trigger at 0x00) should be driven
    /// through [`set_input`](Self::set_input) so writes don't leak into reads.
    #[derive(Default)]
    pub struct MockRegisters {
        state: Mutex<MockState>,
    }

    impl MockRegisters {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Pin the value returned by reads of a register.
        pub fn set_input(&self, window: Window, offset: u32, value: u32) {
            self.state().inputs.insert((window, offset), value);
        }

        /// Remove a pinned value; reads fall back to the last write.
        pub fn clear_input(&self, window: Window, offset: u32) {
            self.state().inputs.remove(&(window, offset));
        }

        /// Queue values returned by the next reads of a register, in order.
        pub fn push_reads(&self, window: Window, offset: u32, values: &[u32]) {
            self.state()
                .scripted
                .entry((window, offset))
                .or_default()
                .extend(values.iter().copied());
        }

        /// Last value written to a register, if any.
        pub fn value(&self, window: Window, offset: u32) -> Option<u32> {
            self.state().values.get(&(window, offset)).copied()
        }

        /// All writes in issue order.
        pub fn writes(&self) -> Vec<RegWrite> {
            self.state().writes.clone()
        }

        /// Values written to one register, in issue order.
        pub fn writes_to(&self, window: Window, offset: u32) -> Vec<u32> {
            self.state()
                .writes
                .iter()
                .filter(|w| w.window == window && w.offset == offset)
                .map(|w| w.value)
                .collect()
        }

        /// Number of reads issued against a register.
        pub fn read_count(&self, window: Window, offset: u32) -> usize {
            self.state()
                .reads
                .iter()
                .filter(|&&r| r == (window, offset))
                .count()
        }

        /// Forget recorded reads and writes (register values are kept).
        pub fn clear_log(&self) {
            let mut st = self.state();
            st.writes.clear();
            st.reads.clear();
        }
    }

    impl RegisterIo for MockRegisters {
        fn read32(&self, window: Window, offset: u32) -> u32 {
            let mut st = self.state();
            st.reads.push((window, offset));
            if let Some(v) = st
                .scripted
                .get_mut(&(window, offset))
                .and_then(|q| q.pop_front())
            {
                return v;
            }
            if let Some(&v) = st.inputs.get(&(window, offset)) {
                return v;
            }
            st.values.get(&(window, offset)).copied().unwrap_or(0)
        }

        fn write32(&self, window: Window, offset: u32, value: u32) {
            let mut st = self.state();
            st.values.insert((window, offset), value);
            st.writes.push(RegWrite {
                window,
                offset,
                value,
            });
        }
    }
}
