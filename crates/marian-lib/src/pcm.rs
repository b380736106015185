//! Substream coordination: the per-direction PCM operations.
//!
//! Playback and capture share one DMA engine. Each direction gets a
//! [`PcmOps`] handle; the handles coordinate through the device lock so the
//! engine keeps running while either direction is still streaming and both
//! agree on one buffer size.

use std::fmt;

use serde::Serialize;

use crate::clock::ClockMode;
use crate::device::{Device, Substream};
use crate::error::Result;
use crate::protocol::*;
use crate::regs::RegisterIo;
use crate::transport::{self, Direction, DmaProgram, HwFault};
use crate::variant::SampleFormat;

// ── Error type ──

/// Stream parameter rejections. No state is changed when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFault {
    /// The card is slaved to an external clock and cannot change rate.
    RateMismatch { requested: u32, current: u32 },
    /// The duplex partner already fixed a different buffer size.
    BusyBufferSizeChanged { recorded: u32, requested: u32 },
    /// Period size not offered for the current clock mode.
    PeriodSizeUnsupported { frames: u32, clock_mode: ClockMode },
    /// The programmed blocks would not fit the ring buffer or the engine.
    BufferOverrun { needed: u64, available: u64 },
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFault::RateMismatch { requested, current } => write!(
                f,
                "sample rate mismatch: requested {requested} Hz, current {current} Hz"
            ),
            StreamFault::BusyBufferSizeChanged {
                recorded,
                requested,
            } => write!(
                f,
                "buffer size changed from {recorded} to {requested} frames while in use"
            ),
            StreamFault::PeriodSizeUnsupported { frames, clock_mode } => {
                write!(f, "period size {frames} frames not supported at {clock_mode}")
            }
            StreamFault::BufferOverrun { needed, available } => write!(
                f,
                "DMA program needs {needed} bytes, ring buffer holds {available}"
            ),
        }
    }
}

impl std::error::Error for StreamFault {}

// ── Types ──

/// Hardware constraints installed on a stream at open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HwConstraints {
    pub clock_mode: ClockMode,
    /// Both bounds equal the measured external rate.
    pub rate_min: u32,
    pub rate_max: u32,
    pub channels_min: u32,
    pub channels_max: u32,
    pub period_sizes: &'static [u32],
    pub periods_min: u32,
    pub periods_max: u32,
    pub buffer_bytes_max: u64,
    pub period_bytes_min: u64,
    pub period_bytes_max: u64,
    pub sample_format: SampleFormat,
    /// Ring buffer handed to the stream.
    pub dma_addr: u64,
    pub dma_bytes: usize,
}

impl HwConstraints {
    pub fn allows_period_size(&self, frames: u32) -> bool {
        self.period_sizes.contains(&frames)
    }

    pub fn allows_channels(&self, channels: u32) -> bool {
        (self.channels_min..=self.channels_max).contains(&channels)
    }
}

/// Negotiated stream parameters passed to [`PcmOps::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmRuntime {
    pub dma_addr: u64,
    pub period_frames: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Stop,
}

/// Non-interleaved layout of one channel in the ring buffer, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub first: u64,
    pub step: u32,
    pub offset: u32,
}

// ── Ops ──

/// PCM operations for one direction of a device.
pub struct PcmOps<'a, R: RegisterIo> {
    dev: &'a Device<R>,
    direction: Direction,
}

impl<R: RegisterIo> Device<R> {
    pub fn playback_ops(&self) -> PcmOps<'_, R> {
        PcmOps {
            dev: self,
            direction: Direction::Playback,
        }
    }

    pub fn capture_ops(&self) -> PcmOps<'_, R> {
        PcmOps {
            dev: self,
            direction: Direction::Capture,
        }
    }

    pub fn pcm_ops(&self, direction: Direction) -> PcmOps<'_, R> {
        PcmOps {
            dev: self,
            direction,
        }
    }

    /// Constraints for a stream opened at the current measured rate.
    pub fn hw_constraints(&self, direction: Direction) -> HwConstraints {
        let rate = self.current_rate();
        let mode = ClockMode::from_sample_rate(rate);
        let caps = self.variant.caps();
        HwConstraints {
            clock_mode: mode,
            rate_min: rate,
            rate_max: rate,
            channels_min: caps.min_channels,
            channels_max: self.variant.max_channels(mode),
            period_sizes: self.variant.period_size_constraints(mode),
            periods_min: DMA_NUM_PERIODS,
            periods_max: DMA_NUM_PERIODS,
            buffer_bytes_max: caps.buffer_bytes_max(),
            period_bytes_min: caps.period_bytes_min(),
            period_bytes_max: caps.period_bytes_max(),
            sample_format: caps.sample_format,
            dma_addr: self.buffer_addr(direction),
            dma_bytes: self.buffer_bytes(direction),
        }
    }
}

impl<R: RegisterIo> PcmOps<'_, R> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Runtime for this direction's ring buffer.
    pub fn runtime(&self, period_frames: u32, channels: u32) -> PcmRuntime {
        PcmRuntime {
            dma_addr: self.dev.buffer_addr(self.direction),
            period_frames,
            channels,
        }
    }

    /// Attach this direction and return its constraints. The ring buffer is
    /// cleared to silence first.
    pub fn open(&self) -> HwConstraints {
        let constraints = self.dev.hw_constraints(self.direction);
        log::debug!(
            "{} open: {} Hz, {}, up to {} channels",
            self.direction,
            constraints.rate_min,
            constraints.clock_mode,
            constraints.channels_max
        );
        self.dev.clear_buffer(self.direction);

        let mut shared = self.dev.lock();
        let slot = shared.slot_mut(self.direction);
        if slot.is_some() {
            log::warn!("{} open: slot already attached, replacing", self.direction);
        }
        *slot = Some(Substream {
            direction: self.direction,
            dma_addr: constraints.dma_addr,
            period_frames: 0,
            channels: 0,
        });
        self.dev.set_attached(self.direction, true);
        constraints
    }

    /// Detach this direction. Quiesces the engine when it was the last one.
    pub fn close(&self) {
        log::debug!("{} close", self.direction);
        self.detach();
    }

    /// Record the buffer size both directions must share.
    pub fn hw_params(
        &self,
        rate: u32,
        buffer_frames: u32,
    ) -> std::result::Result<(), StreamFault> {
        let mut shared = self.dev.lock();
        let current = self.dev.current_rate();
        if rate != current {
            log::error!(
                "{} hw_params: sample rate mismatch. requested: {rate}, current: {current}",
                self.direction
            );
            return Err(StreamFault::RateMismatch {
                requested: rate,
                current,
            });
        }
        if shared.buffer_frames != 0 && shared.buffer_frames != buffer_frames {
            log::error!(
                "{} hw_params: buffer size changed from {} to {buffer_frames}",
                self.direction,
                shared.buffer_frames
            );
            return Err(StreamFault::BusyBufferSizeChanged {
                recorded: shared.buffer_frames,
                requested: buffer_frames,
            });
        }
        shared.buffer_frames = buffer_frames;
        Ok(())
    }

    /// Release this direction's slot.
    pub fn hw_free(&self) {
        log::debug!("{} hw_free", self.direction);
        self.detach();
    }

    fn detach(&self) {
        let mut shared = self.dev.lock();
        *shared.slot_mut(self.direction) = None;
        self.dev.set_attached(self.direction, false);
        if shared.both_empty() {
            self.dev.quiesce_locked(&mut shared);
        }
    }

    /// Blocks per buffer for a period size, checked against the mode's
    /// period table, the engine limit and this direction's ring buffer.
    fn checked_num_blocks(&self, runtime: &PcmRuntime) -> std::result::Result<u32, StreamFault> {
        let mode = ClockMode::from_sample_rate(self.dev.current_rate());
        if !self
            .dev
            .variant
            .period_size_constraints(mode)
            .contains(&runtime.period_frames)
        {
            log::error!(
                "{} prepare: period size {} not supported at {mode}",
                self.direction,
                runtime.period_frames
            );
            return Err(StreamFault::PeriodSizeUnsupported {
                frames: runtime.period_frames,
                clock_mode: mode,
            });
        }

        let available = self.dev.buffer_bytes(self.direction) as u64;
        let num_blocks = u64::from(runtime.period_frames / DMA_SAMPLES_PER_BLOCK)
            * u64::from(DMA_NUM_PERIODS);
        let needed = num_blocks
            * u64::from(DMA_BLOCK_SIZE_BYTES)
            * u64::from(runtime.channels);
        if num_blocks > u64::from(DMA_MAX_NUM_BLOCKS) || needed > available {
            log::error!(
                "{} prepare: {num_blocks} blocks x {} channels needs {needed} bytes, buffer holds {available}",
                self.direction,
                runtime.channels
            );
            return Err(StreamFault::BufferOverrun { needed, available });
        }
        // Bounded by DMA_MAX_NUM_BLOCKS above
        Ok(num_blocks as u32)
    }

    /// Program the engine for this direction.
    pub fn prepare(&self, runtime: &PcmRuntime) -> Result<()> {
        let num_blocks = self.checked_num_blocks(runtime)?;
        let frames = num_blocks * DMA_SAMPLES_PER_BLOCK;

        let mut shared = self.dev.lock();
        if shared.buffer_frames != frames {
            log::error!(
                "{} prepare: buffer size changed from {} to {frames}",
                self.direction,
                shared.buffer_frames
            );
            return Err(StreamFault::BusyBufferSizeChanged {
                recorded: shared.buffer_frames,
                requested: frames,
            }
            .into());
        }

        let program = DmaProgram {
            direction: self.direction,
            channels: runtime.channels,
            host_addr: runtime.dma_addr,
            num_blocks,
            channels_per_slice: self.dev.variant.channels_per_slice(),
        };
        shared.transport.program(&self.dev.regs, &program)?;

        if let Some(sub) = shared.slot_mut(self.direction) {
            sub.period_frames = runtime.period_frames;
            sub.channels = runtime.channels;
            sub.dma_addr = runtime.dma_addr;
        }
        log::debug!("{} prepare: {num_blocks} blocks", self.direction);
        Ok(())
    }

    pub fn trigger(&self, cmd: Trigger) -> std::result::Result<(), HwFault> {
        match cmd {
            Trigger::Start => {
                log::debug!("{} trigger: start", self.direction);
                let mut shared = self.dev.lock();
                if !shared.transport.is_running() {
                    shared.transport.start(&self.dev.regs)?;
                }
            }
            Trigger::Stop => {
                log::debug!("{} trigger: stop", self.direction);
                let regs = transport::num_enable_regs(self.dev.variant.caps().max_channels);
                transport::disable_channels(&self.dev.regs, self.direction, regs);
                self.dev.clear_buffer(self.direction);

                let mut shared = self.dev.lock();
                if shared.slot(self.direction.other()).is_none() {
                    shared.transport.stop(&self.dev.regs);
                }
            }
        }
        Ok(())
    }

    /// Current hardware position in frames.
    pub fn pointer(&self) -> u32 {
        self.dev.sample_counter()
    }

    pub fn channel_info(&self, channel: u32) -> ChannelInfo {
        let buffer_frames = self.dev.buffer_frames();
        ChannelInfo {
            first: u64::from(channel)
                * u64::from(buffer_frames)
                * u64::from(DMA_BYTES_PER_SAMPLE)
                * 8,
            step: 32,
            offset: 0,
        }
    }
}
