//! `reset` subcommand: quiesce a card left running by a previous driver.

use std::path::Path;

use super::{CardSelect, Result, card, load_config};

pub(super) fn cmd_reset(select: &CardSelect, engine: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let Some(opened) = card::open_or_report(&config, select)? else {
        return Ok(());
    };
    let dev = &opened.device;

    dev.soft_reset();
    println!("{}: engine stopped, interrupts masked", opened.slot);

    if engine {
        dev.reset_engine()?;
        println!("{}: DMA engine {}", opened.slot, dev.transport_state());
    }
    Ok(())
}
