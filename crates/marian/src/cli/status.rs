//! `status` subcommand: show engine, clock and interrupt status of a card.

use std::path::Path;

use super::{
    CardSelect, DeviceStatus, Result, StatusOutput, card, kv, kv_indent, kv_width, load_config,
    print_json,
};

fn print_status(slot: &str, status: &DeviceStatus, irq: Option<u32>) {
    let w = kv_width(
        &["Card:", "Slot:", "Engine:", "Clock:", "Interrupts:"],
        &[
            "Transport:",
            "Playback:",
            "Capture:",
            "Buffer:",
            "Sample rate:",
            "Mode:",
            "Line:",
            "Status:",
            "Dangling:",
        ],
    );
    let attached = |a: bool| if a { "attached" } else { "-" };

    kv("Card:", format_args!("{} (build {})", status.card, status.build_no), w);
    kv("Slot:", slot, w);
    println!("Engine:");
    kv_indent("Transport:", status.transport, w);
    kv_indent("Playback:", attached(status.playback_attached), w);
    kv_indent("Capture:", attached(status.capture_attached), w);
    kv_indent("Buffer:", format_args!("{} frames", status.buffer_frames), w);
    println!("Clock:");
    if status.sample_rate_hz == 0 {
        kv_indent("Sample rate:", "no external clock", w);
    } else {
        kv_indent("Sample rate:", format_args!("{} Hz", status.sample_rate_hz), w);
    }
    kv_indent("Mode:", status.clock_mode, w);
    println!("Interrupts:");
    match irq {
        Some(n) => kv_indent("Line:", n, w),
        None => kv_indent("Line:", "none", w),
    }
    kv_indent("Status:", format_args!("0x{:08X}", status.irq_status), w);
    kv_indent("Dangling:", status.dangling_irqs, w);
}

pub(super) fn cmd_status(select: &CardSelect, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let opened = if json {
        card::open_card(&config, select)?
    } else {
        card::open_or_report(&config, select)?
    };

    let Some(opened) = opened else {
        if json {
            print_json(&StatusOutput {
                version: env!("CARGO_PKG_VERSION").to_string(),
                slot: None,
                device: None,
            })?;
        }
        return Ok(());
    };

    // Rate and mode come from a fresh measurement, not a running timer.
    opened.device.timer_tick();
    let status = opened.device.status();

    if json {
        return print_json(&StatusOutput {
            version: env!("CARGO_PKG_VERSION").to_string(),
            slot: Some(opened.slot),
            device: Some(status),
        });
    }
    print_status(&opened.slot, &status, opened.device.irq());
    Ok(())
}
