//! Unified error type for the marian-lib crate.
//!
//! [`MarianError`] wraps the module-specific errors (`HwFault`,
//! `StreamFault`, `DeviceError`) plus I/O and configuration failures.
//! `From` impls let `?` propagate across module boundaries.

use std::fmt;

use crate::device::DeviceError;
use crate::pcm::StreamFault;
use crate::transport::HwFault;

/// Unified error type for marian-lib operations.
#[derive(Debug)]
pub enum MarianError {
    /// DMA engine fault (reset timeout, start from a non-idle state).
    Hw(HwFault),
    /// Stream parameters rejected.
    Stream(StreamFault),
    /// Bring-up or identification error.
    Device(DeviceError),
    /// Standard I/O error (sysfs access, config persistence).
    Io(std::io::Error),
    /// Configuration error.
    Config(String),
}

impl fmt::Display for MarianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarianError::Hw(e) => write!(f, "Hardware fault: {e}"),
            MarianError::Stream(e) => write!(f, "Stream rejected: {e}"),
            MarianError::Device(e) => write!(f, "{e}"),
            MarianError::Io(e) => write!(f, "I/O error: {e}"),
            MarianError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for MarianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MarianError::Hw(e) => Some(e),
            MarianError::Stream(e) => Some(e),
            MarianError::Device(e) => Some(e),
            MarianError::Io(e) => Some(e),
            MarianError::Config(_) => None,
        }
    }
}

impl From<HwFault> for MarianError {
    fn from(e: HwFault) -> Self {
        MarianError::Hw(e)
    }
}

impl From<StreamFault> for MarianError {
    fn from(e: StreamFault) -> Self {
        MarianError::Stream(e)
    }
}

impl From<DeviceError> for MarianError {
    fn from(e: DeviceError) -> Self {
        MarianError::Device(e)
    }
}

impl From<std::io::Error> for MarianError {
    fn from(e: std::io::Error) -> Self {
        MarianError::Io(e)
    }
}

/// Crate-level Result alias using [`MarianError`].
pub type Result<T> = std::result::Result<T, MarianError>;
