//! Error types for the Kalypso pseudonymization system
//!
//! This module provides structured error definitions using thiserror.
//! Every fallible path, the binary included, propagates `KalypsoError` so
//! callers can distinguish fatal pipeline failures from conditions that are
//! recoverable at the bridge boundary.

use crate::types::IdentityClass;
use thiserror::Error;

/// Main error type for Kalypso operations
#[derive(Error, Debug)]
pub enum KalypsoError {
    /// An identity record violated the input contract (missing natural key
    /// or a roster table without the required columns)
    #[error("Malformed identity record: {0}")]
    MalformedIdentity(String),

    /// Two distinct natural keys hashed to the same pseudonym. Fatal to the
    /// run; nothing may be substituted once the mapping is suspect.
    #[error(
        "Pseudonym collision in {class} mapping: keys {first:?} and {second:?} \
         both produce {pseudonym}"
    )]
    PseudonymCollision {
        class: IdentityClass,
        first: String,
        second: String,
        pseudonym: String,
    },

    /// Mirroring the source store failed; the destination has been discarded
    #[error("Mirror I/O error: {0}")]
    MirrorIo(String),

    /// Table named in a bridge call does not exist in the anonymous store
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// The anonymous store already carries a substitution epoch marker
    #[error("Store was already substituted (epoch {0}); rebuild the mirror before re-running")]
    AlreadySubstituted(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Agent API returned a non-success status or an unusable body
    #[error("Agent API error: {0}")]
    AgentApi(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Kalypso operations
pub type Result<T> = std::result::Result<T, KalypsoError>;
