//! Error types for the XPZ core library.

use thiserror::Error;

/// Top-level error type for all XPZ operations.
///
/// Validation refusals (cooldowns, ineligible voice presence, prestige below
/// the threshold) are *not* errors; they are returned as structured verdicts.
#[derive(Error, Debug)]
pub enum XpzError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store refused a write for a reason other than SQLite.
    #[error("Storage unavailable: {0}")]
    Storage(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, XpzError>;
