//! Error types for the chronicle core.

use thiserror::Error;

/// Top-level error type for all chronicle operations.
#[derive(Error, Debug)]
pub enum ChronicleError {
    /// Storage was accessed before the lifecycle coordinator initialized it.
    ///
    /// Surfaced as its own variant so callers can detect the condition and
    /// lazily initialize instead of failing outright.
    #[error("Storage not initialized: {component}")]
    NotInitialized {
        /// Which component was asked for storage.
        component: &'static str,
    },

    /// SQLite counter-store error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query named a journal domain that does not exist.
    #[error("Unknown journal domain: {0}")]
    UnknownDomain(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChronicleError>;
