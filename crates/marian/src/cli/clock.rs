//! `clock` subcommand: measure the external word clock, optionally watching
//! for changes until Ctrl+C.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use marian_lib::monitor::RateAction;
use marian_lib::protocol::MASK_WC_SCAN_SOURCE;
use marian_lib::variant::CardVariant;

use super::{
    CardSelect, ClockMode, ClockOutput, MarianError, RUNNING, Result, card, load_config,
    print_json,
};

/// Sleep granularity while waiting for the next measurement.
const WATCH_POLL: Duration = Duration::from_millis(50);

fn describe(rate_hz: u32) -> String {
    if rate_hz == 0 {
        "no external clock".to_string()
    } else {
        format!("{rate_hz} Hz ({})", ClockMode::from_sample_rate(rate_hz))
    }
}

fn sleep_until(deadline: Instant) {
    while RUNNING.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(WATCH_POLL.min(deadline - now));
    }
}

pub(super) fn cmd_clock(
    select: &CardSelect,
    source: Option<u32>,
    watch: bool,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path);
    if let Some(source) = source {
        if source > MASK_WC_SCAN_SOURCE {
            return Err(MarianError::Config(format!(
                "Invalid clock source {source} (expected 0-{MASK_WC_SCAN_SOURCE})"
            )));
        }
        config.clock_source = source;
    }

    let Some(opened) = card::open_or_report(&config, select)? else {
        return Ok(());
    };
    let dev = &opened.device;
    let report = |rate_hz: u32| -> Result<()> {
        if json {
            print_json(&ClockOutput {
                slot: opened.slot.clone(),
                source: dev.clock_source(),
                rate_hz: (rate_hz != 0).then_some(rate_hz),
                clock_mode: dev.variant().read_clock_mode(dev.regs()),
            })
        } else {
            println!("{}: {}", opened.slot, describe(rate_hz));
            Ok(())
        }
    };

    if !watch {
        dev.timer_tick();
        return report(dev.current_rate());
    }

    let interval = config
        .timer_interval()
        .unwrap_or_else(|| dev.variant().timer_interval());
    if !json {
        println!(
            "Watching source {} every {} ms. Press Ctrl+C to stop.",
            dev.clock_source(),
            interval.as_millis()
        );
    }

    let mut first = true;
    while RUNNING.load(Ordering::SeqCst) {
        let started = Instant::now();
        let changed = matches!(dev.timer_tick(), RateAction::Changed { .. });
        // The first tick always reports, even when no clock is present.
        if changed || first {
            report(dev.current_rate())?;
        }
        first = false;
        sleep_until(started + interval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_rates() {
        assert_eq!(describe(0), "no external clock");
        assert!(describe(96000).starts_with("96000 Hz"));
    }
}
