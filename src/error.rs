//! Error types for the Augury engine

use thiserror::Error;

/// Result type alias for Augury operations
pub type Result<T> = std::result::Result<T, AuguryError>;

/// Main error type for the Augury engine
#[derive(Error, Debug)]
pub enum AuguryError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Phase {phase} failed: {message}")]
    PhaseError { phase: String, message: String },

    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for AuguryError {
    fn from(err: polars::error::PolarsError) -> Self {
        AuguryError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for AuguryError {
    fn from(err: serde_json::Error) -> Self {
        AuguryError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuguryError::ColumnNotFound("price".to_string());
        assert_eq!(err.to_string(), "Column not found: price");
    }

    #[test]
    fn test_phase_error_display() {
        let err = AuguryError::PhaseError {
            phase: "model_training".to_string(),
            message: "no trainable groups".to_string(),
        };
        assert_eq!(err.to_string(), "Phase model_training failed: no trainable groups");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AuguryError = io_err.into();
        assert!(matches!(err, AuguryError::IoError(_)));
    }
}
