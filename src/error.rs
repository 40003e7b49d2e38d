//! Error taxonomy for capture sessions and device backends.

use thiserror::Error;

/// Low-level failure reported by a device backend, carrying the backend's
/// raw status code where the driver exposes one.
#[derive(Debug, Error)]
#[error("driver error: {message}{}", status.map(|s| format!(" [0x{s:x}]")).unwrap_or_default())]
pub struct DriverError {
    pub message: String,
    pub status: Option<u32>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u32) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
            status: err.raw_os_error().map(|c| c as u32),
        }
    }
}

/// Errors surfaced by the capture API.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("device index {index} not found ({available} available)")]
    DeviceNotFound { index: usize, available: usize },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("pixel conversion failed: {0}")]
    ConversionFailed(String),

    #[error("no frame within {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("session is not streaming")]
    NotStreaming,
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
