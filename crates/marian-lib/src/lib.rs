//! marian: streaming engine for MARIAN Clara PCIe sound cards.
//!
//! Register windows, DMA transport, PCM stream operations, interrupt
//! handling and the word clock rate monitor, behind a [`regs::RegisterIo`]
//! backend so the same logic runs against mapped BARs or a mock.

pub mod clock;
pub mod config;
pub mod controls;
pub mod device;
pub mod error;
pub mod irq;
pub mod monitor;
pub mod pcm;
pub mod probe;
pub mod protocol;
pub mod regs;
#[cfg(target_os = "linux")]
pub mod sysfs;
pub mod transport;
pub mod variant;

pub use error::MarianError;
