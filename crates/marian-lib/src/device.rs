//! Device instance: one per card.
//!
//! [`Device`] owns the register backend and everything the PCM, interrupt
//! and timer paths share. Bookkeeping that must stay consistent (transport
//! state, substream slots, buffer size) sits behind a single mutex held only
//! for short non-sleeping sections. Everything the interrupt path reads is
//! either a register or an atomic.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::Serialize;

use crate::clock::{self, ClockMode};
use crate::controls::{ControlId, ControlSink, NullControls};
use crate::irq::{NullPeriods, PeriodSink};
use crate::protocol::*;
use crate::regs::RegisterIo;
use crate::transport::{self, Direction, HwFault, Transport, TransportState};
use crate::variant::{CardState, CardVariant};

// ── Error type ──

/// Device bring-up and identification errors.
///
/// String payloads follow the convention **"context: details"**.
#[derive(Debug)]
pub enum DeviceError {
    /// PCI device id matches no supported variant.
    UnknownDevice { vendor: u16, device: u16 },
    UnsupportedRevision { rev: u8, min: u8, max: u8 },
    /// A variant descriptor field is missing or inconsistent.
    IncompleteDescriptor(&'static str),
    /// The FPGA did not answer with its magic word.
    NotPresent,
    /// Register windows could not be mapped.
    MapFailed(String),
    /// Control registration failed.
    Control(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::UnknownDevice { vendor, device } => {
                write!(f, "Unsupported PCI device {vendor:04x}:{device:04x}")
            }
            DeviceError::UnsupportedRevision { rev, min, max } => write!(
                f,
                "Unsupported hardware revision {rev} (supported: {min}..={max})"
            ),
            DeviceError::IncompleteDescriptor(field) => {
                write!(f, "Incomplete device descriptor: {field}")
            }
            DeviceError::NotPresent => write!(f, "FPGA not detected (magic word mismatch)"),
            DeviceError::MapFailed(e) => write!(f, "Failed to map registers: {e}"),
            DeviceError::Control(e) => write!(f, "Control error: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── DMA buffers ──

/// Host ring buffer for one direction.
///
/// Allocated by the caller; the engine reads and writes it by bus address.
pub struct DmaBuffer {
    pub addr: u64,
    pub area: Box<[u8]>,
}

impl DmaBuffer {
    /// Zero-filled buffer of `bytes` at bus address `addr`.
    pub fn new(addr: u64, bytes: usize) -> Self {
        Self {
            addr,
            area: vec![0u8; bytes].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.area.len()
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_empty()
    }

    /// Fill with silence.
    pub fn clear(&mut self) {
        self.area.fill(0);
    }
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("addr", &format_args!("0x{:016X}", self.addr))
            .field("bytes", &self.area.len())
            .finish()
    }
}

// ── Shared bookkeeping ──

/// A substream attached to one direction's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Substream {
    pub direction: Direction,
    /// Bus address of the ring buffer.
    pub dma_addr: u64,
    /// Set by prepare; 0 until then.
    pub period_frames: u32,
    pub channels: u32,
}

/// State guarded by the device lock.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) transport: Transport,
    pub(crate) playback: Option<Substream>,
    pub(crate) capture: Option<Substream>,
    /// Frames per ring buffer agreed by both directions; 0 = unset.
    pub(crate) buffer_frames: u32,
}

impl Shared {
    pub(crate) fn slot(&self, direction: Direction) -> &Option<Substream> {
        match direction {
            Direction::Playback => &self.playback,
            Direction::Capture => &self.capture,
        }
    }

    pub(crate) fn slot_mut(&mut self, direction: Direction) -> &mut Option<Substream> {
        match direction {
            Direction::Playback => &mut self.playback,
            Direction::Capture => &mut self.capture,
        }
    }

    pub(crate) fn both_empty(&self) -> bool {
        self.playback.is_none() && self.capture.is_none()
    }
}

/// Point-in-time view of the device for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub card: &'static str,
    pub transport: TransportState,
    pub playback_attached: bool,
    pub capture_attached: bool,
    pub buffer_frames: u32,
    pub sample_rate_hz: u32,
    pub clock_mode: ClockMode,
    pub build_no: u32,
    pub sample_counter: u32,
    pub irq_status: u32,
    pub dangling_irqs: u64,
}

// ── Device ──

fn dir_index(direction: Direction) -> usize {
    match direction {
        Direction::Playback => 0,
        Direction::Capture => 1,
    }
}

/// One card instance.
pub struct Device<R: RegisterIo> {
    pub(crate) regs: R,
    pub(crate) variant: &'static dyn CardVariant,
    irq: Option<u32>,
    clock_source: u32,
    pub(crate) shared: Mutex<Shared>,
    /// Mirrors of the two slots, readable without the lock.
    attached: [AtomicBool; 2],
    pub(crate) current_rate: AtomicU32,
    clock_mode: AtomicU8,
    pub(crate) ctl_sample_rate: OnceLock<ControlId>,
    pub(crate) dangling_irqs: AtomicU64,
    buffers: [Mutex<DmaBuffer>; 2],
    pub(crate) period_sink: Arc<dyn PeriodSink>,
    pub(crate) control_sink: Arc<dyn ControlSink>,
}

impl<R: RegisterIo> Device<R> {
    /// Build a device around a register backend and the two DMA buffers.
    ///
    /// Fails if the variant's descriptor is incomplete. The engine starts in
    /// `Unknown`; call [`soft_reset`](Self::soft_reset) before attaching an
    /// interrupt line.
    pub fn new(
        regs: R,
        variant: &'static dyn CardVariant,
        playback_buf: DmaBuffer,
        capture_buf: DmaBuffer,
    ) -> Result<Self> {
        let caps = variant.caps();
        caps.validate()?;
        Ok(Self {
            regs,
            variant,
            irq: None,
            clock_source: 0,
            shared: Mutex::new(Shared {
                transport: Transport::new(caps.max_channels),
                playback: None,
                capture: None,
                buffer_frames: 0,
            }),
            attached: [AtomicBool::new(false), AtomicBool::new(false)],
            current_rate: AtomicU32::new(0),
            clock_mode: AtomicU8::new(ClockMode::Mode48 as u8),
            ctl_sample_rate: OnceLock::new(),
            dangling_irqs: AtomicU64::new(0),
            buffers: [Mutex::new(playback_buf), Mutex::new(capture_buf)],
            period_sink: Arc::new(NullPeriods),
            control_sink: Arc::new(NullControls),
        })
    }

    pub fn with_irq(mut self, irq: u32) -> Self {
        self.irq = Some(irq);
        self
    }

    /// Word clock scan source the timer measures.
    pub fn with_clock_source(mut self, source: u32) -> Self {
        self.clock_source = source & MASK_WC_SCAN_SOURCE;
        self
    }

    pub fn with_period_sink(mut self, sink: Arc<dyn PeriodSink>) -> Self {
        self.period_sink = sink;
        self
    }

    pub fn with_control_sink(mut self, sink: Arc<dyn ControlSink>) -> Self {
        self.control_sink = sink;
        self
    }

    // ── Accessors ──

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn variant(&self) -> &'static dyn CardVariant {
        self.variant
    }

    pub fn irq(&self) -> Option<u32> {
        self.irq
    }

    pub fn clock_source(&self) -> u32 {
        self.clock_source
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn buffer(&self, direction: Direction) -> MutexGuard<'_, DmaBuffer> {
        self.buffers[dir_index(direction)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer_addr(&self, direction: Direction) -> u64 {
        self.buffer(direction).addr
    }

    pub fn buffer_bytes(&self, direction: Direction) -> usize {
        self.buffer(direction).len()
    }

    /// True if the direction's buffer holds only silence.
    pub fn buffer_is_silent(&self, direction: Direction) -> bool {
        self.buffer(direction).area.iter().all(|&b| b == 0)
    }

    /// Run `f` on the direction's buffer (stand-in for the engine or the
    /// framework writing samples).
    pub fn with_buffer_mut<T>(&self, direction: Direction, f: impl FnOnce(&mut [u8]) -> T) -> T {
        f(&mut self.buffer(direction).area)
    }

    pub(crate) fn clear_buffer(&self, direction: Direction) {
        self.buffer(direction).clear();
    }

    pub(crate) fn set_attached(&self, direction: Direction, attached: bool) {
        self.attached[dir_index(direction)].store(attached, Ordering::Release);
    }

    /// Lock-free view of a slot, as seen by the interrupt path.
    pub fn is_attached(&self, direction: Direction) -> bool {
        self.attached[dir_index(direction)].load(Ordering::Acquire)
    }

    pub fn transport_state(&self) -> TransportState {
        self.lock().transport.state()
    }

    pub fn buffer_frames(&self) -> u32 {
        self.lock().buffer_frames
    }

    /// Last measured external sample rate in Hz; 0 when no clock is present.
    pub fn current_rate(&self) -> u32 {
        self.current_rate.load(Ordering::Acquire)
    }

    pub(crate) fn set_current_rate(&self, rate_hz: u32) {
        self.current_rate.store(rate_hz, Ordering::Release);
    }

    /// Clock mode as last read from the clock-mode register.
    pub fn clock_mode(&self) -> ClockMode {
        ClockMode::from_index(self.clock_mode.load(Ordering::Acquire)).unwrap_or(ClockMode::Mode48)
    }

    pub(crate) fn set_clock_mode(&self, mode: ClockMode) {
        self.clock_mode.store(mode as u8, Ordering::Release);
    }

    /// Interrupts that arrived with no substream attached.
    pub fn dangling_irq_count(&self) -> u64 {
        self.dangling_irqs.load(Ordering::Relaxed)
    }

    // ── Diagnostics ──

    pub fn build_no(&self) -> u32 {
        self.regs.read_control(ADDR_BUILD_NO)
    }

    pub fn sample_counter(&self) -> u32 {
        self.regs.read_control(ADDR_SAMPLE_COUNTER)
    }

    pub fn irq_status(&self) -> u32 {
        self.regs.read_control(ADDR_STATUS)
    }

    pub fn detect_presence(&self) -> bool {
        self.variant.detect_presence(&self.regs)
    }

    pub fn indicate_state(&self, state: CardState) {
        log::debug!("{}: indicate state {state}", self.variant.name());
        self.variant.indicate_state(&self.regs, state);
    }

    /// Quiesce whatever a previous driver left running.
    pub fn soft_reset(&self) {
        let _guard = self.lock();
        self.variant.soft_reset(&self.regs);
    }

    /// Reset the DMA engine. Refused while a stream is running.
    pub fn reset_engine(&self) -> std::result::Result<(), HwFault> {
        let mut shared = self.lock();
        if shared.transport.is_running() {
            return Err(HwFault::NotIdle {
                state: shared.transport.state(),
            });
        }
        shared.transport.reset(&self.regs)
    }

    /// Measure the word clock on the configured source. Sleeps; never call
    /// with the device lock held.
    pub fn measure_clock(&self) -> Option<u32> {
        clock::measure_external_clock_hz(&self.regs, self.clock_source)
    }

    /// Stop the engine and mask interrupts once both slots are empty.
    pub(crate) fn quiesce_locked(&self, shared: &mut Shared) {
        shared.transport.stop(&self.regs);
        transport::disable_interrupts(&self.regs);
        shared.buffer_frames = 0;
        log::debug!("{}: engine quiesced", self.variant.name());
    }

    pub fn status(&self) -> DeviceStatus {
        let (transport, playback_attached, capture_attached, buffer_frames) = {
            let shared = self.lock();
            (
                shared.transport.state(),
                shared.playback.is_some(),
                shared.capture.is_some(),
                shared.buffer_frames,
            )
        };
        DeviceStatus {
            card: self.variant.name(),
            transport,
            playback_attached,
            capture_attached,
            buffer_frames,
            sample_rate_hz: self.current_rate(),
            clock_mode: self.clock_mode(),
            build_no: self.build_no(),
            sample_counter: self.sample_counter(),
            irq_status: self.irq_status(),
            dangling_irqs: self.dangling_irq_count(),
        }
    }
}

impl<R: RegisterIo> fmt::Debug for Device<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("variant", &self.variant.name())
            .field("irq", &self.irq)
            .field("rate", &self.current_rate())
            .finish_non_exhaustive()
    }
}
