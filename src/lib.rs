//! Kalypso - Pseudonymizing Query Bridge for Student Assessment Data
//!
//! Kalypso lets an external LLM agent answer questions about student and
//! teacher performance data without ever seeing a real identity. It keeps
//! two SQLite stores:
//! - **Private store**: the source tables plus the pseudonym key registry.
//!   Never leaves the trusted side.
//! - **Anonymous store**: a mirrored copy with display names redacted and
//!   every identity reference rewritten to a one-way SHA-256 pseudonym.
//!   The only store the agent can query.
//!
//! The agent reaches the anonymous store through a four-operation bridge
//! (schema, table info, SQL query, template response). When its final answer
//! needs names, it emits `{s{pseudonym}}` / `{t{pseudonym}}` markers and the
//! bridge resolves them against the private registry on the way out, so real
//! names appear only in the text delivered to the human.
//!
//! # Example
//!
//! ```ignore
//! use kalypso::{pipeline, Settings};
//!
//! let settings = Settings::load(None)?;
//! let report = pipeline::prepare(&settings)?;
//! println!("substituted {} rows", report.substitution.rows_updated());
//! ```

pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Settings;
pub use error::{KalypsoError, Result};
pub use store::{registry::KeyRegistry, AnonStore, PrivateStore};
pub use types::{Dispatch, IdentityClass, IdentityRecord, PseudonymMapping, ToolCall};
