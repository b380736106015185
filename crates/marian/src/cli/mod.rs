//! CLI subcommands: card listing, status, clock, reset and LED control.

mod card;
mod clock;
mod config_cmd;
mod devices;
mod led;
mod reset;
mod status;

use std::path::Path;

use clap::{Args, Subcommand};
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use marian_lib::clock::ClockMode;
pub(super) use marian_lib::config::Config;
pub(super) use marian_lib::device::DeviceStatus;
pub(super) use marian_lib::error::{MarianError, Result};
pub(super) use marian_lib::variant::CardState;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

/// Load the config from `custom_path` or the default location, logging
/// parse warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct CardJson {
    pub slot: String,
    pub vendor: String,
    pub device: String,
    pub revision: u8,
    pub irq: Option<u32>,
    pub model: Option<String>,
}

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<CardJson>,
}

#[derive(Serialize)]
pub(super) struct StatusOutput {
    pub version: String,
    pub slot: Option<String>,
    pub device: Option<DeviceStatus>,
}

#[derive(Serialize)]
pub(super) struct ClockOutput {
    pub slot: String,
    pub source: u32,
    /// `None` when no external clock is present.
    pub rate_hz: Option<u32>,
    pub clock_mode: Option<ClockMode>,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub errors: Vec<String>,
}

/// Card selection shared by the hardware subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct CardSelect {
    /// PCI slot of the card (default: `pci_slot` from config, else first card)
    #[arg(long)]
    pub slot: Option<String>,
}

fn parse_card_state(s: &str) -> std::result::Result<CardState, String> {
    CardState::from_name(s)
        .ok_or_else(|| format!("unknown state \"{s}\" (expected off, success, failure, reset)"))
}

#[derive(Subcommand)]
pub enum Command {
    /// List MARIAN cards on the PCI bus
    Devices,

    /// Show engine, clock and interrupt status of a card
    Status {
        #[command(flatten)]
        card: CardSelect,
    },

    /// Measure the external word clock
    Clock {
        #[command(flatten)]
        card: CardSelect,
        /// Word clock scan source (0-7, default: from config)
        #[arg(long)]
        source: Option<u32>,
        /// Keep measuring and report every rate change (Ctrl+C to stop)
        #[arg(long)]
        watch: bool,
    },

    /// Quiesce the card: stop the engine and mask interrupts
    Reset {
        #[command(flatten)]
        card: CardSelect,
        /// Also reset the DMA engine and wait for it to report idle
        #[arg(long)]
        engine: bool,
    },

    /// Set the front-panel state LED
    Led {
        #[command(flatten)]
        card: CardSelect,
        /// off, success, failure or reset
        #[arg(value_parser = parse_card_state)]
        state: CardState,
    },

    /// Show current configuration and file path
    Config {
        /// Exit with an error if the config does not validate
        #[arg(long)]
        check: bool,
        /// Write the effective settings back to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Devices => devices::cmd_devices(json),
        Command::Status { card } => status::cmd_status(&card, json, config_path),
        Command::Clock {
            card,
            source,
            watch,
        } => clock::cmd_clock(&card, source, watch, json, config_path),
        Command::Reset { card, engine } => {
            if json {
                warn_json_unsupported("reset");
            }
            reset::cmd_reset(&card, engine, config_path)
        }
        Command::Led { card, state } => {
            if json {
                warn_json_unsupported("led");
            }
            led::cmd_led(&card, state, config_path)
        }
        Command::Config { check, write } => {
            config_cmd::cmd_config(check, write, json, config_path)
        }
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Short:", "Longer key:"], &[]);
        // "Longer key:" = 11 + PADDING = 13
        assert_eq!(w, 13);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["A:"], &["Dangling IRQs:"]);
        // 14 + PADDING + 2 = 18
        assert_eq!(w, 18);
    }

    #[test]
    fn values_align_across_levels() {
        let w = kv_width(&["Card:"], &["Transport:"]);
        let top = format_kv("Card:", "V", w);
        let indent = format!("  {:<width$}{}", "Transport:", "V", width = w - 2);
        assert_eq!(top.find('V'), indent.find('V'));
    }

    #[test]
    fn format_kv_exact_width() {
        // Keys longer than the width get no padding
        assert_eq!(format_kv("Sample rate:", "0", 10), "Sample rate:0");
    }

    #[test]
    fn kv_width_empty_both() {
        assert_eq!(kv_width(&[], &[]), 0);
    }
}


#[cfg(test)]
mod json_output_tests {
    use super::*;

    #[test]
    fn status_output_without_card() {
        let output = StatusOutput {
            version: "0.3.0".into(),
            slot: None,
            device: None,
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert_eq!(parsed["version"], "0.3.0");
        assert!(parsed["slot"].is_null());
        assert!(parsed["device"].is_null());
    }

    #[test]
    fn clock_output_without_clock() {
        let output = ClockOutput {
            slot: "0000:03:00.0".into(),
            source: 0,
            rate_hz: None,
            clock_mode: Some(ClockMode::Mode96),
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert!(parsed["rate_hz"].is_null());
        assert!(parsed["clock_mode"].is_string());
    }

    #[test]
    fn devices_output_with_cards() {
        let output = DevicesOutput {
            count: 1,
            devices: vec![CardJson {
                slot: "0000:03:00.0".into(),
                vendor: "1382".into(),
                device: "9050".into(),
                revision: 6,
                irq: None,
                model: Some("Clara E".into()),
            }],
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["devices"][0]["model"], "Clara E");
        assert!(parsed["devices"][0]["irq"].is_null());
    }

    #[test]
    fn config_output_embeds_settings() {
        let output = ConfigOutput {
            config_file: None,
            config_file_exists: false,
            settings: Config::default(),
            errors: vec![],
        };
        let parsed = serde_json::to_value(&output).unwrap();
        assert!(parsed["config_file"].is_null());
        assert_eq!(parsed["settings"]["indicate_state"], true);
        assert_eq!(parsed["settings"]["clock_source"], 0);
    }
}

#[cfg(test)]
mod command_tests {
    use super::*;

    #[test]
    fn cmd_config_with_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(config_cmd::cmd_config(false, false, false, Some(&path)).is_ok());
        assert!(config_cmd::cmd_config(false, false, true, Some(&path)).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn cmd_config_check_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "clock_source = 9\n").unwrap();
        assert!(matches!(
            config_cmd::cmd_config(true, false, false, Some(&path)),
            Err(MarianError::Config(_))
        ));
    }

    #[test]
    fn cmd_config_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        config_cmd::cmd_config(false, true, false, Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# marian configuration"));
        assert_eq!(load_config(Some(&path)), Config::default());
    }

    #[test]
    fn cmd_config_write_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "clock_source = 3
timer_interval_ms = 250
").unwrap();
        config_cmd::cmd_config(false, true, false, Some(&path)).unwrap();
        let config = load_config(Some(&path));
        assert_eq!(config.clock_source, 3);
        assert_eq!(config.timer_interval_ms, 250);
        assert!(config.indicate_state);
    }

    #[test]
    fn cmd_config_write_refuses_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "clock_source = 9
").unwrap();
        assert!(matches!(
            config_cmd::cmd_config(false, true, false, Some(&path)),
            Err(MarianError::Config(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "clock_source = 9
");
    }
}
