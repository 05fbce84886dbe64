//! Core error types

use thiserror::Error;

/// Core error type for ZK GPS
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid geographic coordinate
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
