//! Error taxonomy for the receive → reassemble → upload pipeline
//!
//! Everything except `InitializationFailed` is recoverable: the driver logs it
//! and carries on with the next poll. "No frame" is not an error at all and is
//! reported as `Ok(None)` / `Ok(0)` by the radio and decoder.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for pipeline operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors raised by pipeline components
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("unknown packet type 0x{tag:02X}")]
    UnknownPacketType { tag: u8 },

    #[error("malformed location payload: {payload:?}")]
    MalformedLocation { payload: String },

    #[error("failed to write audio container to {}", path.display())]
    ContainerWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to upload endpoint {host}:{port}")]
    UploadConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("upload failed mid-stream")]
    UploadSendFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("radio link error")]
    Radio {
        #[source]
        source: std::io::Error,
    },

    #[error("{component} initialization failed: {reason}")]
    InitializationFailed { component: &'static str, reason: String },
}

impl RelayError {
    pub fn init_failed(component: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InitializationFailed {
            component,
            reason: reason.to_string(),
        }
    }

    /// Whether the driver may continue after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InitializationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_initialization_is_fatal() {
        assert!(RelayError::UnknownPacketType { tag: 3 }.is_recoverable());
        assert!(RelayError::MalformedLocation {
            payload: "12.3".to_string()
        }
        .is_recoverable());
        assert!(RelayError::UploadSendFailed {
            source: std::io::ErrorKind::BrokenPipe.into()
        }
        .is_recoverable());
        assert!(!RelayError::init_failed("radio", "no such device").is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            RelayError::UnknownPacketType { tag: 3 }.to_string(),
            "unknown packet type 0x03"
        );
        assert_eq!(
            RelayError::init_failed("storage", "read-only").to_string(),
            "storage initialization failed: read-only"
        );
    }
}
