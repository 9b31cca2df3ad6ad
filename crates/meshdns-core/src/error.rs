//! Error types for meshdns
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::gateway::rule::ValidationError;

/// Result type alias for meshdns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for meshdns
#[derive(Error, Debug)]
pub enum Error {
    /// A rule or hostname failed validation (rejected before any mutation)
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Device directory errors
    #[error("Device directory error: {0}")]
    Directory(String),

    /// DNS authority errors
    #[error("DNS authority error: {0}")]
    DnsAuthority(String),

    /// Durable rule store errors
    #[error("Rule store error: {0}")]
    Storage(String),

    /// Template read or render errors
    #[error("Template error: {0}")]
    Template(String),

    /// Gateway reload errors
    #[error("Gateway reload failed: {0}")]
    Reload(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a device directory error
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Create a DNS authority error
    pub fn dns_authority(msg: impl Into<String>) -> Self {
        Self::DnsAuthority(msg.into())
    }

    /// Create a rule store error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a reload error
    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an "already exists" error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Whether this error was raised by input validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
