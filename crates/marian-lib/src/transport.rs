//! DMA transport engine: reset, programming, start/stop.
//!
//! The engine is shared by playback and capture. [`Transport`] tracks its
//! lifecycle and must only be driven while holding the device lock; the
//! free functions below touch registers only and are safe from any context.

use std::fmt;

use serde::Serialize;

use crate::protocol::*;
use crate::regs::{RegisterIo, split_addr};

// ── Error type ──

/// Hardware faults reported by the transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwFault {
    /// The engine never reported idle after a reset. `status` is the last
    /// status word read.
    ResetTimeout { status: u32 },
    /// `start` was called while the engine was not idle.
    NotIdle { state: TransportState },
}

impl fmt::Display for HwFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwFault::ResetTimeout { status } => {
                write!(f, "DMA engine not idle after reset (status 0x{status:08X})")
            }
            HwFault::NotIdle { state } => {
                write!(f, "DMA engine cannot start from state {state}")
            }
        }
    }
}

impl std::error::Error for HwFault {}

pub type Result<T> = std::result::Result<T, HwFault>;

// ── Types ──

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

impl Direction {
    pub fn other(self) -> Self {
        match self {
            Direction::Playback => Direction::Capture,
            Direction::Capture => Direction::Playback,
        }
    }

    /// First channel-enable register of this direction.
    pub fn channels_base(self) -> u32 {
        match self {
            Direction::Playback => ADDR_PLAYBACK_CHANNELS_BASE,
            Direction::Capture => ADDR_CAPTURE_CHANNELS_BASE,
        }
    }

    /// Low host-address register of this direction (high word follows).
    pub fn host_addr_base(self) -> u32 {
        match self {
            Direction::Playback => ADDR_PLAYBACK_HOST_ADDR,
            Direction::Capture => ADDR_CAPTURE_HOST_ADDR,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Playback => write!(f, "playback"),
            Direction::Capture => write!(f, "capture"),
        }
    }
}

/// DMA engine lifecycle.
///
/// `Prepared` is only passed through inside [`Transport::start`]; callers
/// never observe it between operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportState {
    #[default]
    Unknown,
    Idle,
    Prepared,
    Running,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Unknown => write!(f, "unknown"),
            TransportState::Idle => write!(f, "idle"),
            TransportState::Prepared => write!(f, "prepared"),
            TransportState::Running => write!(f, "running"),
        }
    }
}

/// Parameters for one [`Transport::program`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaProgram {
    pub direction: Direction,
    /// Number of enabled channels, starting from channel 0.
    pub channels: u32,
    /// Bus address of the ring buffer.
    pub host_addr: u64,
    /// DMA blocks per buffer (both periods).
    pub num_blocks: u32,
    pub channels_per_slice: u32,
}

// ── Register helpers ──

/// Number of channel-enable registers needed for `max_channels`.
pub fn num_enable_regs(max_channels: u32) -> u32 {
    max_channels.div_ceil(32)
}

/// Channel-enable bitmap: bits `0..count` set, packed 32 per register.
///
/// Counts beyond the register span are clamped.
pub fn channel_enable_bitmap(count: u32, num_regs: u32) -> Vec<u32> {
    let count = count.min(num_regs * 32);
    (0..num_regs)
        .map(|reg| {
            let lo = reg * 32;
            match count.saturating_sub(lo) {
                0 => 0,
                n if n >= 32 => u32::MAX,
                n => (1u32 << n) - 1,
            }
        })
        .collect()
}

fn write_channel_enables(regs: &dyn RegisterIo, direction: Direction, bitmap: &[u32]) {
    let base = direction.channels_base();
    for (i, &word) in bitmap.iter().enumerate() {
        regs.write_control(base + i as u32 * REG_ADDR_INCREASE, word);
    }
}

/// Zero every channel-enable register of one direction.
///
/// Used when one side of a duplex stream stops while the other keeps running.
pub fn disable_channels(regs: &dyn RegisterIo, direction: Direction, num_regs: u32) {
    let zeros = vec![0u32; num_regs as usize];
    write_channel_enables(regs, direction, &zeros);
}

/// Enable DMA core interrupts and unmask the capture period interrupt.
///
/// The mask register also holds the DMA loopback bit and has no readable
/// shadow, so it is written as a whole with loopback kept clear.
pub fn enable_interrupts(regs: &dyn RegisterIo) {
    regs.write_transport(ADDR_XILINX_H2C, 1);
    regs.write_transport(ADDR_XILINX_C2H, 1);
    regs.write_transport(ADDR_XILINX_IRQ_ENABLE, 1);
    regs.write_control(
        ADDR_IRQ_DISABLE,
        !(MASK_IRQ_DMA_LOOPBACK | MASK_IRQ_DISABLE_CAPTURE),
    );
}

/// Disable DMA core interrupts and mask both stream interrupts.
pub fn disable_interrupts(regs: &dyn RegisterIo) {
    regs.write_transport(ADDR_XILINX_H2C, 0);
    regs.write_transport(ADDR_XILINX_C2H, 0);
    regs.write_transport(ADDR_XILINX_IRQ_ENABLE, 0);
    regs.write_control(
        ADDR_IRQ_DISABLE,
        MASK_IRQ_DISABLE_CAPTURE | MASK_IRQ_DISABLE_PLAYBACK,
    );
}

// ── State machine ──

/// Transport engine state. Lives under the device lock.
#[derive(Debug)]
pub struct Transport {
    state: TransportState,
    enable_regs: u32,
}

impl Transport {
    /// New engine in `Unknown` state, sized for `max_channels`.
    pub fn new(max_channels: u32) -> Self {
        Self {
            state: TransportState::Unknown,
            enable_regs: num_enable_regs(max_channels),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TransportState::Running
    }

    /// Number of channel-enable registers per direction.
    pub fn enable_regs(&self) -> u32 {
        self.enable_regs
    }

    /// Stop and reset the engine, then spin until it reports idle.
    ///
    /// No sleep between polls: this runs inside the device lock and the
    /// hardware answers within a few bus cycles.
    pub fn reset(&mut self, regs: &dyn RegisterIo) -> Result<()> {
        regs.write_control(ADDR_PREPARE_RUN, 0);
        regs.write_control(ADDR_RESET_DMA_ENGINE, 0);

        let mut status = 0;
        for attempt in 1..=RESET_POLL_RETRIES {
            status = regs.read_control(ADDR_STATUS);
            if status & MASK_STATUS_IDLE != 0 {
                self.state = TransportState::Idle;
                log::debug!("DMA engine reset: idle after {attempt} poll(s)");
                return Ok(());
            }
            if attempt < RESET_POLL_RETRIES {
                regs.write_control(ADDR_RESET_DMA_ENGINE, 0);
            }
        }

        log::error!("DMA engine not idle after reset: 0x{status:08X}");
        self.state = TransportState::Unknown;
        Err(HwFault::ResetTimeout { status })
    }

    /// Program channel enables, block geometry and host address for one
    /// direction, then enable interrupts.
    ///
    /// Resets the engine first unless it is already running (the other
    /// direction of a duplex stream owns it).
    pub fn program(&mut self, regs: &dyn RegisterIo, p: &DmaProgram) -> Result<()> {
        if !self.is_running() {
            self.reset(regs)?;
        }

        let span = self.enable_regs * 32;
        if p.channels > span {
            log::warn!(
                "{}: {} channels requested, engine supports {span}; clamping",
                p.direction,
                p.channels
            );
        }
        let bitmap = channel_enable_bitmap(p.channels, self.enable_regs);
        write_channel_enables(regs, p.direction, &bitmap);

        regs.write_control(ADDR_NUM_BLOCKS, p.num_blocks);
        regs.write_control(ADDR_NUM_SLICES, p.channels_per_slice);

        let (lo, hi) = split_addr(p.host_addr);
        let base = p.direction.host_addr_base();
        regs.write_control(base, lo);
        regs.write_control(base + REG_ADDR_INCREASE, hi);

        log::debug!(
            "{}: programmed {} channels, {} blocks, host 0x{:016X}",
            p.direction,
            p.channels,
            p.num_blocks,
            p.host_addr
        );
        enable_interrupts(regs);
        Ok(())
    }

    /// Start the engine. Requires `Idle`; any other state is left unchanged.
    pub fn start(&mut self, regs: &dyn RegisterIo) -> Result<()> {
        if self.state != TransportState::Idle {
            return Err(HwFault::NotIdle { state: self.state });
        }
        self.state = TransportState::Prepared;
        regs.write_control(ADDR_PREPARE_RUN, MASK_ENGINE_PREPARE | MASK_ENGINE_RUN);
        self.state = TransportState::Running;
        Ok(())
    }

    /// Stop the engine. Accepted by the hardware from any state.
    pub fn stop(&mut self, regs: &dyn RegisterIo) {
        regs.write_control(ADDR_PREPARE_RUN, 0);
        self.state = TransportState::Idle;
    }

    pub fn disable_channels(&self, regs: &dyn RegisterIo, direction: Direction) {
        disable_channels(regs, direction, self.enable_regs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Window;
    use crate::regs::mock::MockRegisters;

    fn idle_regs() -> MockRegisters {
        let regs = MockRegisters::new();
        regs.set_input(Window::Control, ADDR_STATUS, MASK_STATUS_IDLE);
        regs
    }

    fn program(direction: Direction, channels: u32, host_addr: u64) -> DmaProgram {
        DmaProgram {
            direction,
            channels,
            host_addr,
            num_blocks: 16,
            channels_per_slice: 512,
        }
    }

    // ── Bitmap ──

    #[test]
    fn enable_regs_round_up() {
        assert_eq!(num_enable_regs(512), 16);
        assert_eq!(num_enable_regs(128), 4);
        assert_eq!(num_enable_regs(33), 2);
        assert_eq!(num_enable_regs(1), 1);
    }

    #[test]
    fn bitmap_has_exactly_count_contiguous_bits() {
        for count in 1..=512 {
            let bitmap = channel_enable_bitmap(count, 16);
            assert_eq!(bitmap.len(), 16);
            let ones: u32 = bitmap.iter().map(|w| w.count_ones()).sum();
            assert_eq!(ones, count, "count {count}");
            for ch in 0..512 {
                let set = bitmap[(ch / 32) as usize] & (1 << (ch % 32)) != 0;
                assert_eq!(set, ch < count, "count {count}, channel {ch}");
            }
        }
    }

    #[test]
    fn bitmap_word_boundaries() {
        assert_eq!(channel_enable_bitmap(32, 2), vec![u32::MAX, 0]);
        assert_eq!(channel_enable_bitmap(33, 2), vec![u32::MAX, 1]);
        assert_eq!(channel_enable_bitmap(0, 2), vec![0, 0]);
    }

    #[test]
    fn bitmap_clamps_to_register_span() {
        assert_eq!(channel_enable_bitmap(100, 2), vec![u32::MAX, u32::MAX]);
    }

    // ── Reset ──

    #[test]
    fn reset_idle_on_first_poll() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.reset(&regs).unwrap();
        assert_eq!(t.state(), TransportState::Idle);
        assert_eq!(regs.read_count(Window::Control, ADDR_STATUS), 1);
        assert_eq!(regs.writes_to(Window::Control, ADDR_PREPARE_RUN), vec![0]);
        assert_eq!(regs.writes_to(Window::Control, ADDR_RESET_DMA_ENGINE), vec![0]);
    }

    #[test]
    fn reset_retries_until_idle() {
        let regs = MockRegisters::new();
        regs.push_reads(Window::Control, ADDR_STATUS, &[0, 0, MASK_STATUS_IDLE]);
        let mut t = Transport::new(512);
        t.reset(&regs).unwrap();
        assert_eq!(t.state(), TransportState::Idle);
        assert_eq!(regs.read_count(Window::Control, ADDR_STATUS), 3);
        // Initial trigger plus one per failed poll
        assert_eq!(regs.writes_to(Window::Control, ADDR_RESET_DMA_ENGINE).len(), 3);
    }

    #[test]
    fn reset_timeout_leaves_unknown() {
        let regs = MockRegisters::new();
        regs.set_input(Window::Control, ADDR_STATUS, 0x0800);
        let mut t = Transport::new(512);
        t.stop(&regs);
        assert_eq!(t.state(), TransportState::Idle);

        assert_eq!(
            t.reset(&regs),
            Err(HwFault::ResetTimeout { status: 0x0800 })
        );
        assert_eq!(t.state(), TransportState::Unknown);
        assert_eq!(regs.read_count(Window::Control, ADDR_STATUS), RESET_POLL_RETRIES as usize);
    }

    #[test]
    fn reset_is_idempotent() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.reset(&regs).unwrap();
        t.reset(&regs).unwrap();
        assert_eq!(t.state(), TransportState::Idle);
    }

    // ── Start / stop ──

    #[test]
    fn start_requires_idle() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        assert_eq!(
            t.start(&regs),
            Err(HwFault::NotIdle {
                state: TransportState::Unknown
            })
        );
        assert_eq!(t.state(), TransportState::Unknown);
        assert!(regs.writes().is_empty());

        t.reset(&regs).unwrap();
        t.start(&regs).unwrap();
        assert_eq!(t.state(), TransportState::Running);
        assert_eq!(
            regs.value(Window::Control, ADDR_PREPARE_RUN),
            Some(MASK_ENGINE_PREPARE | MASK_ENGINE_RUN)
        );
    }

    #[test]
    fn start_while_running_is_rejected() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.reset(&regs).unwrap();
        t.start(&regs).unwrap();
        assert_eq!(
            t.start(&regs),
            Err(HwFault::NotIdle {
                state: TransportState::Running
            })
        );
        assert_eq!(t.state(), TransportState::Running);
    }

    #[test]
    fn stop_from_any_state_is_idle() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.stop(&regs);
        assert_eq!(t.state(), TransportState::Idle);
        t.stop(&regs);
        assert_eq!(t.state(), TransportState::Idle);

        t.start(&regs).unwrap();
        t.stop(&regs);
        assert_eq!(t.state(), TransportState::Idle);
        assert_eq!(regs.value(Window::Control, ADDR_PREPARE_RUN), Some(0));
    }

    // ── Program ──

    #[test]
    fn program_round_trips_registers() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.program(&regs, &program(Direction::Playback, 40, 0x1_0000_0000))
            .unwrap();

        assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_CHANNELS_BASE), Some(u32::MAX));
        assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_CHANNELS_BASE + 4), Some(0xFF));
        assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_CHANNELS_BASE + 8), Some(0));
        assert_eq!(regs.value(Window::Control, ADDR_NUM_BLOCKS), Some(16));
        assert_eq!(regs.value(Window::Control, ADDR_NUM_SLICES), Some(512));
        assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_HOST_ADDR), Some(0));
        assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_HOST_ADDR + 4), Some(1));
        // Capture side untouched
        assert!(regs.value(Window::Control, ADDR_CAPTURE_HOST_ADDR).is_none());
        assert!(regs.value(Window::Control, ADDR_CAPTURE_CHANNELS_BASE).is_none());
        assert_eq!(t.state(), TransportState::Idle);
    }

    #[test]
    fn program_capture_uses_capture_bank() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.program(&regs, &program(Direction::Capture, 2, 0x0000_0002_8000_1000))
            .unwrap();
        assert_eq!(regs.value(Window::Control, ADDR_CAPTURE_CHANNELS_BASE), Some(0b11));
        assert_eq!(regs.value(Window::Control, ADDR_CAPTURE_HOST_ADDR), Some(0x8000_1000));
        assert_eq!(regs.value(Window::Control, ADDR_CAPTURE_HOST_ADDR + 4), Some(2));
        assert_eq!(
            regs.writes_to(Window::Control, ADDR_CAPTURE_CHANNELS_BASE + 15 * 4),
            vec![0]
        );
        assert!(regs.value(Window::Control, ADDR_PLAYBACK_HOST_ADDR).is_none());
    }

    #[test]
    fn program_writes_all_enable_registers() {
        let regs = idle_regs();
        let mut t = Transport::new(128);
        t.program(&regs, &program(Direction::Playback, 1, 0)).unwrap();
        let bank: Vec<u32> = regs
            .writes()
            .iter()
            .filter(|w| {
                w.window == Window::Control
                    && (ADDR_PLAYBACK_CHANNELS_BASE..ADDR_CAPTURE_CHANNELS_BASE).contains(&w.offset)
            })
            .map(|w| w.offset)
            .collect();
        assert_eq!(bank, vec![0x100, 0x104, 0x108, 0x10C]);
    }

    #[test]
    fn program_enables_interrupts_last() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.program(&regs, &program(Direction::Playback, 2, 0x1000)).unwrap();
        let writes = regs.writes();
        let tail: Vec<(Window, u32)> = writes[writes.len() - 4..]
            .iter()
            .map(|w| (w.window, w.offset))
            .collect();
        assert_eq!(
            tail,
            vec![
                (Window::Transport, ADDR_XILINX_H2C),
                (Window::Transport, ADDR_XILINX_C2H),
                (Window::Transport, ADDR_XILINX_IRQ_ENABLE),
                (Window::Control, ADDR_IRQ_DISABLE),
            ]
        );
    }

    #[test]
    fn program_skips_reset_while_running() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.reset(&regs).unwrap();
        t.start(&regs).unwrap();
        regs.clear_log();

        t.program(&regs, &program(Direction::Capture, 2, 0x2000)).unwrap();
        assert!(regs.writes_to(Window::Control, ADDR_RESET_DMA_ENGINE).is_empty());
        assert!(regs.writes_to(Window::Control, ADDR_PREPARE_RUN).is_empty());
        assert_eq!(t.state(), TransportState::Running);
    }

    #[test]
    fn program_fails_fast_on_reset_timeout() {
        let regs = MockRegisters::new();
        let mut t = Transport::new(512);
        let err = t
            .program(&regs, &program(Direction::Playback, 2, 0x1000))
            .unwrap_err();
        assert!(matches!(err, HwFault::ResetTimeout { .. }));
        assert_eq!(t.state(), TransportState::Unknown);
        assert!(regs.value(Window::Control, ADDR_NUM_BLOCKS).is_none());
        assert!(regs.value(Window::Transport, ADDR_XILINX_IRQ_ENABLE).is_none());
    }

    // ── Interrupt enables ──

    #[test]
    fn enable_interrupts_keeps_loopback_enabled() {
        let regs = MockRegisters::new();
        enable_interrupts(&regs);
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_H2C), Some(1));
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_C2H), Some(1));
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_IRQ_ENABLE), Some(1));
        assert_eq!(regs.value(Window::Control, ADDR_IRQ_DISABLE), Some(0xFFFF_FFF3));
    }

    #[test]
    fn disable_interrupts_masks_both_streams() {
        let regs = MockRegisters::new();
        disable_interrupts(&regs);
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_H2C), Some(0));
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_C2H), Some(0));
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_IRQ_ENABLE), Some(0));
        assert_eq!(regs.value(Window::Control, ADDR_IRQ_DISABLE), Some(0b110));
    }

    #[test]
    fn disable_channels_zeroes_one_direction() {
        let regs = idle_regs();
        let mut t = Transport::new(512);
        t.program(&regs, &program(Direction::Playback, 64, 0)).unwrap();
        t.program(&regs, &program(Direction::Capture, 64, 0)).unwrap();
        t.disable_channels(&regs, Direction::Playback);
        for i in 0..16 {
            assert_eq!(regs.value(Window::Control, ADDR_PLAYBACK_CHANNELS_BASE + i * 4), Some(0));
        }
        assert_eq!(regs.value(Window::Control, ADDR_CAPTURE_CHANNELS_BASE), Some(u32::MAX));
    }

    // ── Display ──

    #[test]
    fn fault_display() {
        assert_eq!(
            HwFault::ResetTimeout { status: 0x800 }.to_string(),
            "DMA engine not idle after reset (status 0x00000800)"
        );
        assert_eq!(
            HwFault::NotIdle {
                state: TransportState::Running
            }
            .to_string(),
            "DMA engine cannot start from state running"
        );
    }

    #[test]
    fn direction_other() {
        assert_eq!(Direction::Playback.other(), Direction::Capture);
        assert_eq!(Direction::Capture.other(), Direction::Playback);
    }
}
