//! Error types for the HRV relay

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while sampling, relaying, or querying
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Health store access failed: {0}")]
    Store(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send to peer timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("Invalid JSON: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Datagram decode error: {0}")]
    Decode(String),

    #[error("Sensor registration failed: {0}")]
    SensorRegistration(String),

    #[error("Insufficient samples for HRV computation: {0}")]
    InsufficientSamples(usize),

    #[error("Vendor SDK not initialized")]
    NotInitialized,

    #[error("No permission-granting surface available")]
    NoPermissionSurface,

    #[error("Permission request failed: {0}")]
    PermissionRequest(String),
}

impl RelayError {
    /// Stable error code reported across the method bridge and the C ABI.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            RelayError::Store(_) | RelayError::PermissionDenied(_) => "READ_FAILED",
            RelayError::Transport(_) | RelayError::SendTimeout(_) => "SEND_FAILED",
            RelayError::Codec(_) | RelayError::Decode(_) => "DECODE_FAILED",
            RelayError::SensorRegistration(_) => "SENSOR_UNAVAILABLE",
            RelayError::InsufficientSamples(_) => "INSUFFICIENT_SAMPLES",
            RelayError::NotInitialized => "NOT_INITIALIZED",
            RelayError::NoPermissionSurface => "NO_PERMISSION_SURFACE",
            RelayError::PermissionRequest(_) => "PERMISSION_REQUEST_FAILED",
        }
    }
}
