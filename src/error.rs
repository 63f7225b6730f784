//! Error handling for Layerdeck
//!
//! Errors follow the engine's recovery policy: decode and schedule failures
//! are isolated to a single layer, export failures abort the whole export,
//! and persistence failures never touch in-memory state.

use thiserror::Error;

use crate::engine::device::DeviceError;
use crate::layers::LayerId;

/// Result type alias for Layerdeck operations
pub type Result<T> = std::result::Result<T, LayerdeckError>;

/// Main error type for Layerdeck operations
#[derive(Error, Debug)]
pub enum LayerdeckError {
    // Decode Errors
    #[error("Failed to decode audio: {reason}")]
    Decode {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio too short: {duration_secs:.3}s (minimum 0.1s)")]
    AudioTooShort { duration_secs: f64 },

    // Scheduling Errors
    #[error("Cannot schedule layer {layer_id}: {reason}")]
    Schedule { layer_id: LayerId, reason: String },

    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    // Export Errors
    #[error("Export failed: {reason}")]
    Export { reason: String },

    #[error("An export is already in progress")]
    ExportBusy,

    // Persistence Errors
    #[error("Persistence failed: {reason}")]
    Persistence { reason: String },

    // Layer Errors
    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("Invalid time string '{input}': {reason}")]
    InvalidTimeString { input: String, reason: String },

    #[error("Engine is not initialized")]
    NotInitialized,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LayerdeckError {
    /// Build a decode error without an underlying source
    pub fn decode(reason: impl Into<String>) -> Self {
        LayerdeckError::Decode {
            reason: reason.into(),
            source: None,
        }
    }

    /// Build an export error
    pub fn export(reason: impl Into<String>) -> Self {
        LayerdeckError::Export {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            LayerdeckError::Decode { .. } => "DECODE_FAILURE",
            LayerdeckError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            LayerdeckError::AudioTooShort { .. } => "AUDIO_TOO_SHORT",
            LayerdeckError::Schedule { .. } => "SCHEDULE_FAILURE",
            LayerdeckError::Device(_) => "DEVICE_ERROR",
            LayerdeckError::Export { .. } => "EXPORT_FAILURE",
            LayerdeckError::ExportBusy => "EXPORT_BUSY",
            LayerdeckError::Persistence { .. } => "PERSISTENCE_FAILURE",
            LayerdeckError::LayerNotFound(_) => "LAYER_NOT_FOUND",
            LayerdeckError::InvalidTimeString { .. } => "INVALID_TIME_STRING",
            LayerdeckError::NotInitialized => "NOT_INITIALIZED",
            LayerdeckError::Io(_) => "IO_ERROR",
            LayerdeckError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the session can continue unaffected after this error
    ///
    /// Schedule failures skip a single layer for one playback pass; decode
    /// and persistence failures leave existing layers untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LayerdeckError::Decode { .. }
                | LayerdeckError::UnsupportedFormat { .. }
                | LayerdeckError::AudioTooShort { .. }
                | LayerdeckError::Schedule { .. }
                | LayerdeckError::ExportBusy
                | LayerdeckError::Persistence { .. }
                | LayerdeckError::InvalidTimeString { .. }
                | LayerdeckError::LayerNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = LayerdeckError::decode("truncated header");
        assert_eq!(err.error_code(), "DECODE_FAILURE");
        assert_eq!(err.to_string(), "Failed to decode audio: truncated header");

        let err = LayerdeckError::export("buffer too large");
        assert_eq!(err.error_code(), "EXPORT_FAILURE");
    }

    #[test]
    fn test_schedule_failure_is_recoverable() {
        let err = LayerdeckError::Schedule {
            layer_id: LayerId::new(),
            reason: "non-positive play span".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("non-positive play span"));
    }

    #[test]
    fn test_export_failure_is_not_recoverable() {
        assert!(!LayerdeckError::export("io").is_recoverable());
        assert!(!LayerdeckError::NotInitialized.is_recoverable());
    }

    #[test]
    fn test_device_error_conversion() {
        let err: LayerdeckError = DeviceError::UnknownNode(7).into();
        assert_eq!(err.error_code(), "DEVICE_ERROR");
    }
}
