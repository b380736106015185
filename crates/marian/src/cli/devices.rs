//! `devices` subcommand: list MARIAN cards on the PCI bus.

use super::{DevicesOutput, Result, card, print_json};

pub(super) fn cmd_devices(json: bool) -> Result<()> {
    let devices = card::list_cards();

    if json {
        return print_json(&DevicesOutput {
            count: devices.len(),
            devices,
        });
    }

    if devices.is_empty() {
        println!("No MARIAN cards found.");
        return Ok(());
    }

    println!(
        "Found {} MARIAN card{}:",
        devices.len(),
        if devices.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, dev) in devices.iter().enumerate() {
        let model = dev.model.as_deref().unwrap_or("unsupported");
        println!(
            "  [{}] {}  {model}  ({}:{} rev {})",
            i + 1,
            dev.slot,
            dev.vendor,
            dev.device,
            dev.revision
        );
        if let Some(irq) = dev.irq {
            println!("      IRQ: {irq}");
        }
    }

    Ok(())
}
