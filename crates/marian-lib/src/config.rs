//! Tool configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::probe::ProbeOptions;
use crate::protocol::MASK_WC_SCAN_SOURCE;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# marian configuration: changes made by `marian-cli config` may overwrite manual edits.\n\n";

/// Accepted range for a non-default timer interval.
pub const TIMER_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 10..=60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// PCI slot of the card to use, e.g. "0000:03:00.0". Empty = first card found.
    #[serde(default)]
    pub pci_slot: String,

    /// Word clock scan source (0-7) measured for the sample rate.
    #[serde(default)]
    pub clock_source: u32,

    /// Rate monitor interval in milliseconds. 0 = card default.
    #[serde(default)]
    pub timer_interval_ms: u64,

    /// Drive the front-panel LED on bring-up and teardown.
    #[serde(default = "default_true")]
    pub indicate_state: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pci_slot: String::new(),
            clock_source: 0,
            timer_interval_ms: 0,
            indicate_state: true,
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `pci_slot` is not of the form `DDDD:BB:DD.F`.
    InvalidPciSlot(String),
    /// `clock_source` does not fit the 3-bit scan selector.
    InvalidClockSource(u32),
    /// `timer_interval_ms` is non-zero but outside [`TIMER_INTERVAL_RANGE_MS`].
    TimerIntervalOutOfRange(u64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidPciSlot(s) => {
                write!(f, "Invalid pci_slot \"{s}\" (expected DDDD:BB:DD.F)")
            }
            ValidationError::InvalidClockSource(n) => {
                write!(f, "Invalid clock_source {n} (expected 0-{MASK_WC_SCAN_SOURCE})")
            }
            ValidationError::TimerIntervalOutOfRange(ms) => write!(
                f,
                "Invalid timer_interval_ms {ms} (expected 0 or {}-{})",
                TIMER_INTERVAL_RANGE_MS.start(),
                TIMER_INTERVAL_RANGE_MS.end()
            ),
        }
    }
}

/// True for a full PCI address such as `0000:03:00.0`.
pub fn is_valid_pci_slot(slot: &str) -> bool {
    let Some((domain, rest)) = slot.split_once(':') else {
        return false;
    };
    let Some((bus, rest)) = rest.split_once(':') else {
        return false;
    };
    let Some((dev, func)) = rest.split_once('.') else {
        return false;
    };
    let hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    hex(domain, 4)
        && hex(bus, 2)
        && hex(dev, 2)
        && func.len() == 1
        && func.chars().all(|c| ('0'..='7').contains(&c))
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("marian"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Save config to the default platform path.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config directory",
            ));
        };
        self.save_to(&path)
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Configured timer interval, `None` for the card default.
    pub fn timer_interval(&self) -> Option<Duration> {
        (self.timer_interval_ms != 0).then(|| Duration::from_millis(self.timer_interval_ms))
    }

    /// Selected PCI slot, `None` for "first card found".
    pub fn pci_slot(&self) -> Option<&str> {
        let slot = self.pci_slot.trim();
        (!slot.is_empty()).then_some(slot)
    }

    /// Bring-up options derived from this config.
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            clock_source: self.clock_source & MASK_WC_SCAN_SOURCE,
            timer_interval: self.timer_interval(),
            indicate_state: self.indicate_state,
            ..ProbeOptions::default()
        }
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(slot) = self.pci_slot()
            && !is_valid_pci_slot(slot)
        {
            errors.push(ValidationError::InvalidPciSlot(slot.to_string()));
        }
        if self.clock_source > MASK_WC_SCAN_SOURCE {
            errors.push(ValidationError::InvalidClockSource(self.clock_source));
        }
        if self.timer_interval_ms != 0 && !TIMER_INTERVAL_RANGE_MS.contains(&self.timer_interval_ms)
        {
            errors.push(ValidationError::TimerIntervalOutOfRange(
                self.timer_interval_ms,
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and convert the error list into a single config error.
    pub fn check(&self) -> crate::error::Result<()> {
        self.validate().map_err(|errors| {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            crate::error::MarianError::Config(joined.join("; "))
        })
    }
}
