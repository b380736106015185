//! Linux sysfs backend: card enumeration and BAR mapping.
//!
//! Cards are found under `/sys/bus/pci/devices`; each BAR is exposed there
//! as a `resourceN` file that can be mapped directly. Requires root (or
//! matching permissions on the resource files) for real hardware.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use serde::Serialize;

use crate::device::{DeviceError, Result};
use crate::probe::PciIdentity;
use crate::protocol::MARIAN_VENDOR_ID;
use crate::regs::{RegisterIo, Window};
use crate::variant;

/// Default sysfs PCI device directory.
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// Value returned for reads outside a window, as on a PCIe bus error.
pub const BUS_ERROR_VALUE: u32 = 0xFFFF_FFFF;

/// A MARIAN card found in sysfs.
#[derive(Debug, Clone, Serialize)]
pub struct PciCard {
    /// PCI address, e.g. "0000:03:00.0".
    pub slot: String,
    pub identity: PciIdentity,
    /// Variant name, `None` when the device id is not supported.
    pub model: Option<&'static str>,
}

fn read_hex(path: &Path) -> io::Result<u32> {
    let text = fs::read_to_string(path)?;
    let t = text.trim();
    let digits = t.strip_prefix("0x").unwrap_or(t);
    u32::from_str_radix(digits, 16)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display())))
}

/// Read a hex attribute that must fit `T`.
fn read_hex_as<T: TryFrom<u32>>(path: &Path) -> io::Result<T> {
    let value = read_hex(path)?;
    T::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: 0x{value:X} out of range", path.display()),
        )
    })
}

fn read_identity(dir: &Path) -> io::Result<PciIdentity> {
    let vendor = read_hex_as::<u16>(&dir.join("vendor"))?;
    let device = read_hex_as::<u16>(&dir.join("device"))?;
    let revision = read_hex_as::<u8>(&dir.join("revision")).unwrap_or(0);
    let irq = fs::read_to_string(dir.join("irq"))
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|&n| n != 0);
    Ok(PciIdentity {
        vendor,
        device,
        revision,
        irq,
    })
}

/// List MARIAN cards under a sysfs PCI device directory, sorted by slot.
pub fn list_cards_in(root: &Path) -> io::Result<Vec<PciCard>> {
    let mut cards = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let dir = entry.path();
        let identity = match read_identity(&dir) {
            Ok(id) => id,
            Err(e) => {
                log::debug!("skipping {}: {e}", dir.display());
                continue;
            }
        };
        if identity.vendor != MARIAN_VENDOR_ID {
            continue;
        }
        cards.push(PciCard {
            slot: entry.file_name().to_string_lossy().into_owned(),
            model: variant::lookup_variant(identity.device).map(|v| v.name()),
            identity,
        });
    }
    cards.sort_by(|a, b| a.slot.cmp(&b.slot));
    Ok(cards)
}

/// List MARIAN cards on this machine.
pub fn list_cards() -> io::Result<Vec<PciCard>> {
    list_cards_in(Path::new(SYSFS_PCI_DEVICES))
}

/// Pick a card by slot, or the first supported one when `slot` is `None`.
pub fn find_card(cards: &[PciCard], slot: Option<&str>) -> Option<PciCard> {
    match slot {
        Some(s) => cards.iter().find(|c| c.slot == s).cloned(),
        None => cards.iter().find(|c| c.model.is_some()).cloned(),
    }
}

// ── BAR mapping ──

struct Bar {
    map: MmapMut,
    base: *mut u8,
}

impl Bar {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DeviceError::MapFailed(format!("{}: {e}", path.display())))?;
        // SAFETY: the mapping is private to this process and lives as long as
        // `Bar`; concurrent hardware-side changes are why every access below
        // is volatile.
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| DeviceError::MapFailed(format!("{}: {e}", path.display())))?;
        let base = map.as_mut_ptr();
        Ok(Self { map, base })
    }

    fn in_range(&self, offset: u32) -> bool {
        offset % 4 == 0 && (offset as usize).saturating_add(4) <= self.map.len()
    }
}

/// Register backend over the two memory-mapped BARs of one card.
pub struct SysfsBars {
    slot_dir: PathBuf,
    control: Bar,
    transport: Bar,
}

// SAFETY: `base` pointers are only used for aligned, in-range volatile
// 32-bit accesses, which the hardware treats as atomic.
unsafe impl Send for SysfsBars {}
unsafe impl Sync for SysfsBars {}

impl SysfsBars {
    /// Map `resource0` (control) and `resource1` (transport) of a slot under
    /// `root`.
    pub fn open_in(root: &Path, slot: &str) -> Result<Self> {
        let slot_dir = root.join(slot);
        let control = Bar::open(&slot_dir.join("resource0"))?;
        let transport = Bar::open(&slot_dir.join("resource1"))?;
        log::debug!(
            "{slot}: mapped control {} bytes, transport {} bytes",
            control.map.len(),
            transport.map.len()
        );
        Ok(Self {
            slot_dir,
            control,
            transport,
        })
    }

    pub fn open(slot: &str) -> Result<Self> {
        Self::open_in(Path::new(SYSFS_PCI_DEVICES), slot)
    }

    pub fn slot_dir(&self) -> &Path {
        &self.slot_dir
    }

    fn bar(&self, window: Window) -> &Bar {
        match window {
            Window::Control => &self.control,
            Window::Transport => &self.transport,
        }
    }
}

impl RegisterIo for SysfsBars {
    fn read32(&self, window: Window, offset: u32) -> u32 {
        let bar = self.bar(window);
        if !bar.in_range(offset) {
            log::warn!("{window} read out of range: 0x{offset:X}");
            return BUS_ERROR_VALUE;
        }
        // SAFETY: checked aligned and in range of the live mapping.
        unsafe { std::ptr::read_volatile(bar.base.add(offset as usize) as *const u32) }
    }

    fn write32(&self, window: Window, offset: u32, value: u32) {
        let bar = self.bar(window);
        if !bar.in_range(offset) {
            log::warn!("{window} write out of range ignored: 0x{offset:X}");
            return;
        }
        // SAFETY: checked aligned and in range of the live mapping.
        unsafe { std::ptr::write_volatile(bar.base.add(offset as usize) as *mut u32, value) }
    }
}
