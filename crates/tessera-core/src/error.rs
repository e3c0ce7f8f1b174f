//! Error types for Tessera.

use thiserror::Error;

/// Result type alias for Tessera operations.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Main error type for Tessera operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Host environment problems (distributed launcher config, auth token).
    #[error("Environment error: {0}")]
    Environment(String),

    /// The dataset loader could not build the prepared dataset.
    #[error("Dataset materialization failed: {0}")]
    DatasetMaterialization(String),

    /// Malformed tabular input or I/O failure while converting it.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// HuggingFace Hub errors.
    #[error("Hub error: {0}")]
    Hub(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TesseraError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
