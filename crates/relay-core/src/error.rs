use std::io;
use thiserror::Error;

/// Result type for relay core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for relay core operations
///
/// Only recoverable conditions live here. Contract violations (calls on a
/// destroyed object, double-attached destructors) are routed through the
/// fault handler instead and never surface as an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A construction step could not acquire its resource
    #[error("Failed to allocate {what}: {reason}")]
    Allocation {
        /// What was being acquired
        what: &'static str,
        /// Why the acquisition failed
        reason: String,
    },

    /// An id is already present in a lookup table
    #[error("Duplicate id: {0}")]
    DuplicateId(u64),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Shorthand for an [`Error::Allocation`]
    pub fn allocation(what: &'static str, reason: impl Into<String>) -> Self {
        Error::Allocation {
            what,
            reason: reason.into(),
        }
    }

    /// True for failures raised while acquiring construction resources
    pub fn is_allocation(&self) -> bool {
        matches!(self, Error::Allocation { .. } | Error::DuplicateId(_))
    }
}
