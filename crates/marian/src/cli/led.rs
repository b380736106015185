//! `led` subcommand: set the front-panel state LED.

use std::path::Path;

use super::{CardSelect, CardState, Result, card, load_config};

pub(super) fn cmd_led(select: &CardSelect, state: CardState, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let Some(opened) = card::open_or_report(&config, select)? else {
        return Ok(());
    };
    if !config.indicate_state {
        log::warn!("indicate_state is off in config; setting the LED anyway");
    }
    opened.device.indicate_state(state);
    println!("{}: LED set to {state}", opened.slot);
    Ok(())
}
