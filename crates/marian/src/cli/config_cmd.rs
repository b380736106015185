//! `config` subcommand: show current configuration and file path, or write
//! the effective settings back to disk.

use std::path::Path;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width, load_config, print_json};

/// Validate and save `config` to `custom_path` or the default location.
fn write_config(config: &Config, custom_path: Option<&Path>) -> Result<()> {
    config.check()?;
    match custom_path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }
    Ok(())
}

pub(super) fn cmd_config(
    check: bool,
    write: bool,
    json: bool,
    custom_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(custom_path);
    if write {
        write_config(&config, custom_path)?;
        log::info!("config written");
    }
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let errors: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errs) => errs.iter().map(ToString::to_string).collect(),
    };

    if json {
        print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config.clone(),
            errors: errors.clone(),
        })?;
    } else {
        let w = kv_width(
            &["Config file:"],
            &[
                "pci_slot:",
                "clock_source:",
                "timer_interval_ms:",
                "indicate_state:",
            ],
        );

        match &config_path {
            Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
            Some(p) => kv(
                "Config file:",
                format_args!("{} (not found, using defaults)", p.display()),
                w,
            ),
            None => kv("Config file:", "(no config directory)", w),
        }
        println!();

        println!("Settings:");
        kv_indent("pci_slot:", config.pci_slot().unwrap_or("(first card found)"), w);
        kv_indent("clock_source:", config.clock_source, w);
        match config.timer_interval() {
            Some(d) => kv_indent("timer_interval_ms:", d.as_millis(), w),
            None => kv_indent("timer_interval_ms:", "(card default)", w),
        }
        kv_indent("indicate_state:", config.indicate_state, w);

        if !errors.is_empty() {
            println!();
            println!("Problems:");
            for e in &errors {
                println!("  {e}");
            }
        }
    }

    if check {
        config.check()?;
    }
    Ok(())
}
