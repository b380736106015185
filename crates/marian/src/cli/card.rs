//! Card discovery and attach for the hardware subcommands.

use super::{CardJson, CardSelect, Config, Result};
use marian_lib::device::Device;
use marian_lib::regs::RegisterIo;
use marian_lib::variant::CardVariant;

/// A card attached for diagnostics. No DMA buffers, no timer.
pub(super) type Card = Device<Box<dyn RegisterIo>>;

pub(super) struct OpenCard {
    pub slot: String,
    pub device: Card,
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use marian_lib::device::{DeviceError, DmaBuffer};
    use marian_lib::probe;
    use marian_lib::sysfs::{self, PciCard, SysfsBars};

    fn scan() -> Vec<PciCard> {
        match sysfs::list_cards() {
            Ok(cards) => cards,
            Err(e) => {
                log::warn!("cannot read {}: {e}", sysfs::SYSFS_PCI_DEVICES);
                Vec::new()
            }
        }
    }

    pub(in crate::cli) fn list_cards() -> Vec<CardJson> {
        scan()
            .into_iter()
            .map(|c| CardJson {
                slot: c.slot,
                vendor: format!("{:04x}", c.identity.vendor),
                device: format!("{:04x}", c.identity.device),
                revision: c.identity.revision,
                irq: c.identity.irq,
                model: c.model.map(str::to_string),
            })
            .collect()
    }

    pub(in crate::cli) fn open_card(config: &Config, select: &CardSelect) -> Result<Option<OpenCard>> {
        let wanted = select.slot.as_deref().or(config.pci_slot());
        let Some(card) = sysfs::find_card(&scan(), wanted) else {
            return Ok(None);
        };
        let variant = probe::identify(&card.identity)?;
        let bars = SysfsBars::open(&card.slot)?;
        let mut device = Device::new(
            Box::new(bars) as Box<dyn RegisterIo>,
            variant,
            DmaBuffer::new(0, 0),
            DmaBuffer::new(0, 0),
        )?
        .with_clock_source(config.clock_source);
        if let Some(irq) = card.identity.irq {
            device = device.with_irq(irq);
        }
        if !device.detect_presence() {
            return Err(DeviceError::NotPresent.into());
        }
        log::debug!("{}: attached {}", card.slot, variant.name());
        Ok(Some(OpenCard {
            slot: card.slot,
            device,
        }))
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::*;

    pub(in crate::cli) fn list_cards() -> Vec<CardJson> {
        log::warn!("PCI enumeration is only supported on Linux");
        Vec::new()
    }

    pub(in crate::cli) fn open_card(
        _config: &Config,
        _select: &CardSelect,
    ) -> Result<Option<OpenCard>> {
        log::warn!("card access is only supported on Linux");
        Ok(None)
    }
}

pub(super) use platform::{list_cards, open_card};

/// Open the selected card, printing a notice when none is found.
pub(super) fn open_or_report(config: &Config, select: &CardSelect) -> Result<Option<OpenCard>> {
    let card = open_card(config, select)?;
    if card.is_none() {
        match &select.slot {
            Some(slot) => println!("No MARIAN card at {slot}."),
            None => println!("No MARIAN card found."),
        }
    }
    Ok(card)
}
