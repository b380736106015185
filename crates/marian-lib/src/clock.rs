//! Word clock measurement and clock-mode derivation.
//!
//! The card never generates its own sample rate; it slaves to an external
//! word clock and can only measure it. A measurement writes the source
//! selector, then polls the scan-result register until the ready bit shows up.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::*;
use crate::regs::RegisterIo;

/// Rates a measurement snaps to when it lands within 1 %.
pub const STANDARD_RATES_HZ: [u32; 13] = [
    22050, 32000, 44100, 48000, 64000, 88200, 96000, 128000, 176400, 192000, 256000, 352800,
    384000,
];

/// Coarse sample-rate family. Gates channel count and period sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClockMode {
    /// Up to 50 kHz (44.1 / 48 kHz family).
    Mode48 = 0,
    /// Up to 100 kHz (88.2 / 96 kHz family).
    Mode96 = 1,
    /// Above 100 kHz (176.4 / 192 kHz family).
    Mode192 = 2,
}

impl ClockMode {
    pub const ALL: [ClockMode; 3] = [ClockMode::Mode48, ClockMode::Mode96, ClockMode::Mode192];

    /// Clock mode of a sample rate. A rate of 0 (no clock) maps to `Mode48`.
    pub fn from_sample_rate(rate_hz: u32) -> Self {
        if rate_hz <= 50_000 {
            ClockMode::Mode48
        } else if rate_hz <= 100_000 {
            ClockMode::Mode96
        } else {
            ClockMode::Mode192
        }
    }

    /// Decode the clock-mode register (bits 1:0).
    pub fn from_register(reg: u32) -> Option<Self> {
        match reg & MASK_CLOCK_MODE {
            0b11 => Some(ClockMode::Mode48),
            0b10 => Some(ClockMode::Mode96),
            0b01 => Some(ClockMode::Mode192),
            _ => None,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ClockMode::Mode48 => "CLOCK_MODE_48",
            ClockMode::Mode96 => "CLOCK_MODE_96",
            ClockMode::Mode192 => "CLOCK_MODE_192",
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snap a raw frequency to a standard rate within ±1 %, else return it as is.
pub fn snap_to_standard_rate(freq_hz: u32) -> u32 {
    let freq = u64::from(freq_hz);
    let min = freq * 99;
    let max = freq * 101;
    STANDARD_RATES_HZ
        .iter()
        .copied()
        .find(|&std_hz| {
            let scaled = u64::from(std_hz) * 100;
            scaled >= min && scaled <= max
        })
        .unwrap_or(freq_hz)
}

/// Convert a scan-result word to Hz (unsnapped).
pub fn scan_result_to_hz(result: u32) -> u32 {
    WC_SCAN_REFERENCE_HZ / ((result & MASK_WC_SCAN_RESULT) + 1)
}

/// Measure the external word clock on `source`.
///
/// Returns `None` when the scan never reports ready, which means no clock
/// is present. Sleeps between polls, so must not run under the device lock.
pub fn measure_external_clock_hz(regs: &dyn RegisterIo, source: u32) -> Option<u32> {
    measure_with_delay(
        regs,
        source,
        Duration::from_millis(WC_SCAN_POLL_DELAY_MS),
    )
}

pub(crate) fn measure_with_delay(
    regs: &dyn RegisterIo,
    source: u32,
    delay: Duration,
) -> Option<u32> {
    regs.write_control(ADDR_WC_SCAN_SOURCE, source & MASK_WC_SCAN_SOURCE);
    for attempt in 0..WC_SCAN_RETRIES {
        let reg = regs.read_control(ADDR_WC_SCAN_RESULT);
        if reg & MASK_WC_SCAN_READY != 0 {
            let raw = scan_result_to_hz(reg);
            let snapped = snap_to_standard_rate(raw);
            log::debug!("word clock scan: source {source}, raw {raw} Hz -> {snapped} Hz");
            return Some(snapped);
        }
        if attempt + 1 < WC_SCAN_RETRIES && !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    log::debug!("word clock scan: source {source} not ready, no clock");
    None
}
