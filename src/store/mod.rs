//! Storage layer: the two-tier trust boundary
//!
//! The private store holds real identities (source tables plus the key
//! registry); the anonymous store holds the redacted, pseudonymized mirror
//! that is safe to expose. Neither handle keeps a live connection: every
//! operation acquires a scoped connection on entry and drops it on every
//! exit path.

pub mod mirror;
pub mod registry;
pub mod substitute;

use crate::error::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Handle to the private store. Real identities live here and nowhere else.
#[derive(Debug, Clone)]
pub struct PrivateStore {
    path: PathBuf,
}

impl PrivateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scoped read-only connection (roster loads, registry lookups)
    pub fn connect_read_only(&self) -> Result<Connection> {
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY,
        )?)
    }

    /// Scoped writable connection (registry persistence only)
    pub fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }
}

/// Handle to the anonymous store, the only store the agent side ever touches
#[derive(Debug, Clone)]
pub struct AnonStore {
    path: PathBuf,
}

impl AnonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scoped connection for one operation
    pub fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }
}

/// Canonical string form of a natural-key cell
///
/// Numeric IDs canonicalize to their decimal form, matching what the hash
/// was computed over. NULL yields `None`.
pub(crate) fn canonical_key(value: &rusqlite::types::Value) -> Option<String> {
    use rusqlite::types::Value;
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Blob(b) => Some(hex::encode(b)),
    }
}
