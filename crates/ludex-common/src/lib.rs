//! Ludex Common Library
//!
//! Shared types and utilities for the Ludex workspace members:
//!
//! - **Error Handling**: common error and result types
//! - **Fingerprints**: canonical content hashing for change detection
//! - **Logging**: tracing subscriber bootstrap shared by all binaries

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{LudexError, Result};
pub use fingerprint::Fingerprint;
