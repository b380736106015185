//! Register map for MARIAN Clara PCIe cards.
//!
//! Offsets are byte offsets into one of the two memory windows:
//!
//! - **control** (BAR0): FPGA registers: status, LEDs, clock scan, DMA
//!   engine programming.
//! - **transport** (BAR1): the PCIe DMA core: per-direction engine enables
//!   and the global interrupt enable.
//!
//! Register 0x00 of the control window is overloaded: reads return the
//! interrupt/status word, writes trigger a DMA engine reset.

// ── PCI identity ──

/// MARIAN vendor ID.
pub const MARIAN_VENDOR_ID: u16 = 0x1382;

/// Clara E (Dante) device ID.
pub const CLARA_E_DEVICE_ID: u16 = 0x9050;

/// Clara Emin device ID.
pub const CLARA_EMIN_DEVICE_ID: u16 = 0x9820;

// ── Control window: identification and diagnostics ──

/// Interrupt/status word (read).
pub const ADDR_STATUS: u32 = 0x00;

/// DMA engine reset trigger (write, any value).
pub const ADDR_RESET_DMA_ENGINE: u32 = 0x00;

/// Front-panel LED / driver state indicator.
pub const ADDR_LED: u32 = 0xF4;

/// Running hardware sample counter (frames).
pub const ADDR_SAMPLE_COUNTER: u32 = 0x8C;

/// FPGA build number.
pub const ADDR_BUILD_NO: u32 = 0xFC;

/// FPGA magic word, reads [`FPGA_MAGIC_WORD`] when the bitstream is loaded.
pub const ADDR_MAGIC_WORD: u32 = 0xF0;

/// Expected value of [`ADDR_MAGIC_WORD`].
pub const FPGA_MAGIC_WORD: u32 = 0xAD10_F96A;

/// Clock mode as selected by the external clock master (bits 1:0).
pub const ADDR_CLOCK_MODE: u32 = 0x80;

/// Mask for [`ADDR_CLOCK_MODE`].
pub const MASK_CLOCK_MODE: u32 = 0x3;

// ── Control window: word clock scan ──

/// Word clock scan source selector (bits 2:0).
pub const ADDR_WC_SCAN_SOURCE: u32 = 0xC8;

/// Word clock scan result. Bit 31 = ready, bits 17:0 = period count.
pub const ADDR_WC_SCAN_RESULT: u32 = 0x94;

/// Scan result ready flag.
pub const MASK_WC_SCAN_READY: u32 = 0x8000_0000;

/// Scan result period count.
pub const MASK_WC_SCAN_RESULT: u32 = 0x3FFFF;

/// Source selector mask.
pub const MASK_WC_SCAN_SOURCE: u32 = 0x7;

/// Scan reference clock: `freq_hz = WC_SCAN_REFERENCE_HZ / (count + 1)`.
pub const WC_SCAN_REFERENCE_HZ: u32 = 1_280_000_000;

// ── Control window: DMA engine ──

/// Run/prepare control.
pub const ADDR_PREPARE_RUN: u32 = 0x84;

/// Engine run bit in [`ADDR_PREPARE_RUN`].
pub const MASK_ENGINE_RUN: u32 = 1 << 0;

/// Engine prepare bit in [`ADDR_PREPARE_RUN`].
pub const MASK_ENGINE_PREPARE: u32 = 1 << 1;

/// First playback channel-enable register (16 consecutive registers).
pub const ADDR_PLAYBACK_CHANNELS_BASE: u32 = 0x100;

/// First capture channel-enable register (16 consecutive registers).
pub const ADDR_CAPTURE_CHANNELS_BASE: u32 = 0x180;

/// Number of DMA blocks per buffer.
pub const ADDR_NUM_BLOCKS: u32 = 0x10;

/// Channels per DMA slice.
pub const ADDR_NUM_SLICES: u32 = 0xB0;

/// Playback host address, low word at +0, high word at +4.
pub const ADDR_PLAYBACK_HOST_ADDR: u32 = 0x200;

/// Capture host address, low word at +0, high word at +4.
pub const ADDR_CAPTURE_HOST_ADDR: u32 = 0x300;

/// Interrupt mask register (a set bit disables the source).
pub const ADDR_IRQ_DISABLE: u32 = 0xAC;

/// Playback interrupt disable bit in [`ADDR_IRQ_DISABLE`].
pub const MASK_IRQ_DISABLE_PLAYBACK: u32 = 1 << 1;

/// Capture interrupt disable bit in [`ADDR_IRQ_DISABLE`].
pub const MASK_IRQ_DISABLE_CAPTURE: u32 = 1 << 2;

/// DMA loopback bit, shares [`ADDR_IRQ_DISABLE`]. Must stay clear.
pub const MASK_IRQ_DMA_LOOPBACK: u32 = 1 << 3;

/// Status: engine idle.
pub const MASK_STATUS_IDLE: u32 = 1 << 4;

/// Status: capture period elapsed.
pub const MASK_IRQ_STATUS_CAPTURE: u32 = 1 << 11;

/// Status: capture page currently being filled.
pub const MASK_STATUS_CAPTURE_PAGE: u32 = 1 << 12;

/// Status: engine reached the prepared state.
pub const MASK_IRQ_STATUS_PREPARED: u32 = 1 << 14;

/// Byte distance between consecutive 32-bit registers.
pub const REG_ADDR_INCREASE: u32 = 4;

// ── Transport window ──

/// Host-to-card engine control.
pub const ADDR_XILINX_H2C: u32 = 0x4;

/// Card-to-host engine control.
pub const ADDR_XILINX_C2H: u32 = 0x1004;

/// Global interrupt enable.
pub const ADDR_XILINX_IRQ_ENABLE: u32 = 0x2004;

// ── DMA geometry ──

/// Frames per DMA block.
pub const DMA_SAMPLES_PER_BLOCK: u32 = 16;

/// Periods per ring buffer. The engine only supports double buffering.
pub const DMA_NUM_PERIODS: u32 = 2;

/// Upper bound on blocks per buffer accepted by the engine.
pub const DMA_MAX_NUM_BLOCKS: u32 = 1024;

/// Bytes per sample slot in host memory.
pub const DMA_BYTES_PER_SAMPLE: u32 = 4;

/// Bytes per channel per DMA block.
pub const DMA_BLOCK_SIZE_BYTES: u32 = DMA_SAMPLES_PER_BLOCK * DMA_BYTES_PER_SAMPLE;

// ── Timing ──

/// Status polls before a DMA engine reset is declared failed. No delay
/// between polls; the engine normally reports idle on the first read.
pub const RESET_POLL_RETRIES: u32 = 5;

/// Word clock scan polls before the clock is declared absent.
pub const WC_SCAN_RETRIES: u32 = 3;

/// Delay between word clock scan polls in milliseconds.
pub const WC_SCAN_POLL_DELAY_MS: u64 = 3;

/// Default interval of the maintenance timer in milliseconds.
pub const TIMER_INTERVAL_MS: u64 = 1000;
