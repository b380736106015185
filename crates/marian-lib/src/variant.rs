//! Card variants: capability descriptors and the variant contract.
//!
//! Each supported card is a static [`Capabilities`] table plus a unit type
//! implementing the sealed [`CardVariant`] trait. The descriptor is checked
//! once when a [`Device`](crate::device::Device) is built; after that every
//! lookup is infallible.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::clock::ClockMode;
use crate::device::DeviceError;
use crate::protocol::*;
use crate::regs::RegisterIo;
use crate::transport;

/// Sample layout the DMA engine delivers in host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleFormat {
    /// 32-bit little endian, one sample per 4-byte slot.
    S32Le,
    /// Packed 24-bit little endian.
    S24_3Le,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::S32Le => write!(f, "S32_LE"),
            SampleFormat::S24_3Le => write!(f, "S24_3LE"),
        }
    }
}

/// Front-panel state shown through the LED register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardState {
    Off,
    Success,
    Failure,
    Reset,
}

impl CardState {
    pub fn register_value(self) -> u32 {
        match self {
            CardState::Off => 0b00,
            CardState::Success => 0b01,
            CardState::Failure => 0b10,
            CardState::Reset => 0b11,
        }
    }

    /// Parse a state name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "off" => Some(CardState::Off),
            "success" | "ok" => Some(CardState::Success),
            "failure" | "fail" => Some(CardState::Failure),
            "reset" => Some(CardState::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardState::Off => write!(f, "off"),
            CardState::Success => write!(f, "success"),
            CardState::Failure => write!(f, "failure"),
            CardState::Reset => write!(f, "reset"),
        }
    }
}

// ── Descriptor ──

/// Per-variant constants. Indexed by [`ClockMode::index`] where per-mode.
#[derive(Debug)]
pub struct Capabilities {
    pub card_name: &'static str,
    pub device_id: u16,
    pub min_revision: u8,
    pub max_revision: u8,
    pub min_channels: u32,
    pub max_channels: u32,
    pub max_channels_per_mode: [u32; 3],
    pub period_sizes: [&'static [u32]; 3],
    pub channels_per_slice: u32,
    /// Upper bound on DMA blocks per buffer used for buffer sizing.
    pub max_dma_blocks: u32,
    pub samples_per_block: u32,
    pub sample_format: SampleFormat,
    pub rate_min: u32,
    pub rate_max: u32,
    pub timer_interval_ms: u64,
}

impl Capabilities {
    /// Reject a descriptor with missing or inconsistent fields.
    pub fn validate(&self) -> Result<(), DeviceError> {
        let incomplete = |field: &'static str| Err(DeviceError::IncompleteDescriptor(field));

        if self.card_name.is_empty() {
            return incomplete("card_name");
        }
        if self.device_id == 0 {
            return incomplete("device_id");
        }
        if self.min_revision > self.max_revision {
            return incomplete("revision range");
        }
        if self.min_channels == 0 || self.min_channels > self.max_channels {
            return incomplete("channel range");
        }
        for mode in ClockMode::ALL {
            let max = self.max_channels_per_mode[mode.index()];
            if max == 0 || max > self.max_channels {
                return incomplete("max_channels_per_mode");
            }
            if self.period_sizes[mode.index()].is_empty() {
                return incomplete("period_sizes");
            }
        }
        if self.channels_per_slice == 0 {
            return incomplete("channels_per_slice");
        }
        if self.max_dma_blocks == 0 || self.max_dma_blocks > DMA_MAX_NUM_BLOCKS {
            return incomplete("max_dma_blocks");
        }
        if self.samples_per_block != DMA_SAMPLES_PER_BLOCK {
            return incomplete("samples_per_block");
        }
        if self.rate_min == 0 || self.rate_min > self.rate_max {
            return incomplete("rate range");
        }
        if self.timer_interval_ms == 0 {
            return incomplete("timer_interval_ms");
        }
        Ok(())
    }

    /// Largest ring buffer in bytes (both periods, all channels).
    pub fn buffer_bytes_max(&self) -> u64 {
        u64::from(DMA_BLOCK_SIZE_BYTES)
            * u64::from(self.max_dma_blocks)
            * u64::from(DMA_NUM_PERIODS)
            * u64::from(self.max_channels)
    }

    pub fn period_bytes_min(&self) -> u64 {
        u64::from(DMA_BLOCK_SIZE_BYTES) * u64::from(self.min_channels)
    }

    pub fn period_bytes_max(&self) -> u64 {
        u64::from(DMA_BLOCK_SIZE_BYTES)
            * u64::from(self.max_dma_blocks)
            * u64::from(self.max_channels)
    }

    /// DMA buffer size to allocate per direction.
    pub fn dma_buffer_bytes(&self) -> usize {
        (DMA_BLOCK_SIZE_BYTES * self.max_dma_blocks * self.max_channels) as usize
    }
}

// ── Contract ──

mod sealed {
    pub trait Sealed {}
}

/// Operations every card variant supplies.
///
/// Sealed: the set of variants is closed and each one's descriptor is
/// checked by [`Capabilities::validate`] before a device is built.
pub trait CardVariant: sealed::Sealed + fmt::Debug + Send + Sync + 'static {
    fn caps(&self) -> &'static Capabilities;

    fn name(&self) -> &'static str {
        self.caps().card_name
    }

    fn hardware_revision_valid(&self, rev: u8) -> bool {
        let (min, max) = self.valid_revision_range();
        (min..=max).contains(&rev)
    }

    fn valid_revision_range(&self) -> (u8, u8) {
        (self.caps().min_revision, self.caps().max_revision)
    }

    fn period_size_constraints(&self, mode: ClockMode) -> &'static [u32] {
        self.caps().period_sizes[mode.index()]
    }

    fn max_channels(&self, mode: ClockMode) -> u32 {
        self.caps().max_channels_per_mode[mode.index()]
    }

    fn channels_per_slice(&self) -> u32 {
        self.caps().channels_per_slice
    }

    fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.caps().timer_interval_ms)
    }

    /// True when the FPGA bitstream answers with its magic word.
    fn detect_presence(&self, regs: &dyn RegisterIo) -> bool {
        let magic = regs.read_control(ADDR_MAGIC_WORD);
        if magic == FPGA_MAGIC_WORD {
            log::info!(
                "{}: FPGA detected, build no: {:08X}",
                self.name(),
                regs.read_control(ADDR_BUILD_NO)
            );
            true
        } else {
            log::debug!("{}: magic word mismatch: 0x{magic:08X}", self.name());
            false
        }
    }

    /// Stop the engine and mask interrupts, clearing whatever a previous
    /// driver instance left running.
    fn soft_reset(&self, regs: &dyn RegisterIo) {
        regs.write_control(ADDR_PREPARE_RUN, 0);
        transport::disable_interrupts(regs);
    }

    /// Clock mode selected by the external clock master.
    fn read_clock_mode(&self, regs: &dyn RegisterIo) -> Option<ClockMode> {
        let reg = regs.read_control(ADDR_CLOCK_MODE);
        let mode = ClockMode::from_register(reg);
        if mode.is_none() {
            log::warn!("{}: invalid clock mode register 0x{reg:08X}", self.name());
        }
        mode
    }

    fn indicate_state(&self, regs: &dyn RegisterIo, state: CardState) {
        regs.write_control(ADDR_LED, state.register_value());
    }
}

// ── Clara E ──

const BASE_PERIOD_SIZES: [u32; 12] = [16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024];

static CLARA_E_PERIODS_48: [u32; 12] = BASE_PERIOD_SIZES;
static CLARA_E_PERIODS_96: [u32; 13] =
    [16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 2048];
static CLARA_E_PERIODS_192: [u32; 15] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 4096,
];

static CLARA_E_CAPS: Capabilities = Capabilities {
    card_name: "Clara E",
    device_id: CLARA_E_DEVICE_ID,
    min_revision: 6,
    max_revision: 6,
    min_channels: 1,
    max_channels: 512,
    max_channels_per_mode: [512, 256, 128],
    period_sizes: [&CLARA_E_PERIODS_48, &CLARA_E_PERIODS_96, &CLARA_E_PERIODS_192],
    channels_per_slice: 512,
    max_dma_blocks: 128,
    samples_per_block: DMA_SAMPLES_PER_BLOCK,
    sample_format: SampleFormat::S32Le,
    rate_min: 44100,
    rate_max: 192000,
    timer_interval_ms: TIMER_INTERVAL_MS,
};

/// MARIAN Clara E (Dante, up to 512 channels).
#[derive(Debug)]
pub struct ClaraE;

impl sealed::Sealed for ClaraE {}

impl CardVariant for ClaraE {
    fn caps(&self) -> &'static Capabilities {
        &CLARA_E_CAPS
    }
}

// ── Clara Emin ──

static CLARA_EMIN_PERIODS_48_96: [u32; 14] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 2048, 4096,
];
static CLARA_EMIN_PERIODS_192: [u32; 15] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 4096,
];

static CLARA_EMIN_CAPS: Capabilities = Capabilities {
    card_name: "Clara Emin",
    device_id: CLARA_EMIN_DEVICE_ID,
    min_revision: 4,
    max_revision: 5,
    min_channels: 1,
    max_channels: 512,
    max_channels_per_mode: [128, 128, 128],
    period_sizes: [
        &CLARA_EMIN_PERIODS_48_96,
        &CLARA_EMIN_PERIODS_48_96,
        &CLARA_EMIN_PERIODS_192,
    ],
    channels_per_slice: 128,
    max_dma_blocks: 128,
    samples_per_block: DMA_SAMPLES_PER_BLOCK,
    sample_format: SampleFormat::S24_3Le,
    rate_min: 44100,
    rate_max: 192000,
    timer_interval_ms: TIMER_INTERVAL_MS,
};

/// MARIAN Clara Emin (up to 128 channels).
#[derive(Debug)]
pub struct ClaraEmin;

impl sealed::Sealed for ClaraEmin {}

impl CardVariant for ClaraEmin {
    fn caps(&self) -> &'static Capabilities {
        &CLARA_EMIN_CAPS
    }
}

pub static CLARA_E: ClaraE = ClaraE;
pub static CLARA_EMIN: ClaraEmin = ClaraEmin;

/// All supported variants.
pub fn variants() -> [&'static dyn CardVariant; 2] {
    [&CLARA_E, &CLARA_EMIN]
}

/// Variant for a PCI device id, or `None` if the card is not supported.
pub fn lookup_variant(device_id: u16) -> Option<&'static dyn CardVariant> {
    variants()
        .into_iter()
        .find(|v| v.caps().device_id == device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Window;
    use crate::regs::mock::MockRegisters;

    #[test]
    fn builtin_descriptors_are_complete() {
        for v in variants() {
            v.caps().validate().unwrap();
        }
    }

    #[test]
    fn lookup_by_device_id() {
        assert_eq!(lookup_variant(0x9050).unwrap().name(), "Clara E");
        assert_eq!(lookup_variant(0x9820).unwrap().name(), "Clara Emin");
        assert!(lookup_variant(0x1234).is_none());
    }

    #[test]
    fn revision_ranges() {
        assert!(CLARA_E.hardware_revision_valid(6));
        assert!(!CLARA_E.hardware_revision_valid(5));
        assert!(!CLARA_E.hardware_revision_valid(7));
        assert_eq!(CLARA_EMIN.valid_revision_range(), (4, 5));
        assert!(CLARA_EMIN.hardware_revision_valid(4));
        assert!(CLARA_EMIN.hardware_revision_valid(5));
        assert!(!CLARA_EMIN.hardware_revision_valid(3));
    }

    #[test]
    fn max_channels_follow_clock_mode() {
        assert_eq!(CLARA_E.max_channels(ClockMode::Mode48), 512);
        assert_eq!(CLARA_E.max_channels(ClockMode::Mode96), 256);
        assert_eq!(CLARA_E.max_channels(ClockMode::Mode192), 128);
        for mode in ClockMode::ALL {
            assert_eq!(CLARA_EMIN.max_channels(mode), 128);
        }
    }

    #[test]
    fn period_sizes_per_mode() {
        assert_eq!(CLARA_E.period_size_constraints(ClockMode::Mode48).last(), Some(&1024));
        assert_eq!(CLARA_E.period_size_constraints(ClockMode::Mode96).last(), Some(&2048));
        assert_eq!(CLARA_E.period_size_constraints(ClockMode::Mode192).last(), Some(&4096));
        assert_eq!(CLARA_EMIN.period_size_constraints(ClockMode::Mode48).last(), Some(&4096));
        assert!(!CLARA_EMIN.period_size_constraints(ClockMode::Mode96).contains(&1536));
        assert!(CLARA_EMIN.period_size_constraints(ClockMode::Mode192).contains(&1536));
    }

    #[test]
    fn period_sizes_are_whole_blocks() {
        for v in variants() {
            for mode in ClockMode::ALL {
                for &size in v.period_size_constraints(mode) {
                    assert_eq!(size % DMA_SAMPLES_PER_BLOCK, 0, "{} {mode} {size}", v.name());
                }
            }
        }
    }

    #[test]
    fn byte_bounds() {
        let caps = CLARA_E.caps();
        assert_eq!(caps.buffer_bytes_max(), 64 * 128 * 2 * 512);
        assert_eq!(caps.period_bytes_min(), 64);
        assert_eq!(caps.period_bytes_max(), 64 * 128 * 512);
        assert_eq!(caps.dma_buffer_bytes(), 64 * 128 * 512);
    }

    #[test]
    fn incomplete_descriptor_is_rejected() {
        static EMPTY: [u32; 0] = [];
        let caps = Capabilities {
            period_sizes: [&CLARA_E_PERIODS_48, &EMPTY, &CLARA_E_PERIODS_192],
            ..clone_caps(&CLARA_E_CAPS)
        };
        assert!(matches!(
            caps.validate(),
            Err(DeviceError::IncompleteDescriptor("period_sizes"))
        ));

        let caps = Capabilities {
            channels_per_slice: 0,
            ..clone_caps(&CLARA_E_CAPS)
        };
        assert!(matches!(
            caps.validate(),
            Err(DeviceError::IncompleteDescriptor("channels_per_slice"))
        ));

        let caps = Capabilities {
            min_revision: 7,
            ..clone_caps(&CLARA_E_CAPS)
        };
        assert!(caps.validate().is_err());
    }

    fn clone_caps(c: &Capabilities) -> Capabilities {
        Capabilities {
            card_name: c.card_name,
            device_id: c.device_id,
            min_revision: c.min_revision,
            max_revision: c.max_revision,
            min_channels: c.min_channels,
            max_channels: c.max_channels,
            max_channels_per_mode: c.max_channels_per_mode,
            period_sizes: c.period_sizes,
            channels_per_slice: c.channels_per_slice,
            max_dma_blocks: c.max_dma_blocks,
            samples_per_block: c.samples_per_block,
            sample_format: c.sample_format,
            rate_min: c.rate_min,
            rate_max: c.rate_max,
            timer_interval_ms: c.timer_interval_ms,
        }
    }

    #[test]
    fn detect_presence_checks_magic_word() {
        let regs = MockRegisters::new();
        assert!(!CLARA_E.detect_presence(&regs));
        regs.set_input(Window::Control, ADDR_MAGIC_WORD, FPGA_MAGIC_WORD);
        assert!(CLARA_E.detect_presence(&regs));
    }

    #[test]
    fn soft_reset_stops_engine_and_masks_irqs() {
        let regs = MockRegisters::new();
        CLARA_EMIN.soft_reset(&regs);
        assert_eq!(regs.value(Window::Control, ADDR_PREPARE_RUN), Some(0));
        assert_eq!(regs.value(Window::Transport, ADDR_XILINX_IRQ_ENABLE), Some(0));
        assert_eq!(
            regs.value(Window::Control, ADDR_IRQ_DISABLE),
            Some(MASK_IRQ_DISABLE_CAPTURE | MASK_IRQ_DISABLE_PLAYBACK)
        );
    }

    #[test]
    fn read_clock_mode_register() {
        let regs = MockRegisters::new();
        regs.set_input(Window::Control, ADDR_CLOCK_MODE, 0b10);
        assert_eq!(CLARA_E.read_clock_mode(&regs), Some(ClockMode::Mode96));
        regs.set_input(Window::Control, ADDR_CLOCK_MODE, 0);
        assert_eq!(CLARA_E.read_clock_mode(&regs), None);
    }

    #[test]
    fn indicate_state_writes_led() {
        let regs = MockRegisters::new();
        for (state, value) in [
            (CardState::Off, 0),
            (CardState::Success, 1),
            (CardState::Failure, 2),
            (CardState::Reset, 3),
        ] {
            CLARA_E.indicate_state(&regs, state);
            assert_eq!(regs.value(Window::Control, ADDR_LED), Some(value));
        }
    }

    #[test]
    fn card_state_names() {
        assert_eq!(CardState::from_name("OK"), Some(CardState::Success));
        assert_eq!(CardState::from_name("reset"), Some(CardState::Reset));
        assert_eq!(CardState::from_name("blink"), None);
        assert_eq!(CardState::Failure.to_string(), "failure");
    }

    #[test]
    fn sample_formats() {
        assert_eq!(CLARA_E.caps().sample_format.to_string(), "S32_LE");
        assert_eq!(CLARA_EMIN.caps().sample_format.to_string(), "S24_3LE");
    }
}
