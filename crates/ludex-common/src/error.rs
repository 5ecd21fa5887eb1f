//! Error types shared across Ludex crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, LudexError>;

/// Base error type for shared utilities
#[derive(Error, Debug)]
pub enum LudexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
