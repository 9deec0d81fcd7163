//! Core data types for the Kalypso pseudonymization system
//!
//! Defines the identity model (classes, records, pseudonym mappings) and the
//! closed tool-call vocabulary the bridge accepts. Everything the agent can
//! ask for is a `ToolCall` variant; there is no string-name dispatch past the
//! bridge boundary.

use crate::error::{KalypsoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel written into every identity-display column of the anonymous store
pub const SENTINEL: &str = "REDACTED";

/// A category of real-world entity being pseudonymized
///
/// Students are keyed by their numeric `StudentID`; teachers are keyed by
/// their full display name, which doubles as the natural key. The two
/// pseudonym spaces stay disjoint because each class hashes only its own
/// key space, not because the hash function knows about classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityClass {
    Student,
    Teacher,
}

impl IdentityClass {
    /// Single-character discriminator used in template markers
    pub fn discriminator(&self) -> char {
        match self {
            IdentityClass::Student => 's',
            IdentityClass::Teacher => 't',
        }
    }

    /// Parse a marker discriminator
    pub fn from_discriminator(c: char) -> Option<Self> {
        match c {
            's' => Some(IdentityClass::Student),
            't' => Some(IdentityClass::Teacher),
            _ => None,
        }
    }

    /// Registry table holding this class's mapping in the private store
    pub fn key_table(&self) -> &'static str {
        match self {
            IdentityClass::Student => "student_key",
            IdentityClass::Teacher => "teacher_key",
        }
    }

    /// Source table the class roster is loaded from
    pub fn roster_table(&self) -> &'static str {
        match self {
            IdentityClass::Student => "students",
            IdentityClass::Teacher => "teachers",
        }
    }

    /// Column name that marks an identity-reference column for this class
    pub fn reference_column(&self) -> &'static str {
        match self {
            IdentityClass::Student => "StudentID",
            IdentityClass::Teacher => "TeacherName",
        }
    }
}

impl std::fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityClass::Student => write!(f, "student"),
            IdentityClass::Teacher => write!(f, "teacher"),
        }
    }
}

/// One real-world identity as read from a roster table
///
/// Students carry separate first/last display attributes. Teachers display
/// their natural key, so both name fields are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Natural key in canonical string form (decimal for numeric IDs)
    pub natural_key: String,

    /// First name, when the class carries one
    pub first_name: Option<String>,

    /// Last name, when the class carries one
    pub last_name: Option<String>,
}

impl IdentityRecord {
    /// Human-readable display name for template resolution
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.natural_key.clone(),
        }
    }
}

/// One row of a pseudonym mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudonymEntry {
    pub record: IdentityRecord,
    pub pseudonym: String,
}

/// Total injective mapping from natural key to pseudonym for one identity
/// class, valid for the lifetime of one anonymization run
///
/// Built once by the key builder, persisted only in the private store, and
/// never mutated afterwards. Duplicate natural keys in the input collapse to
/// one entry; distinct keys colliding on a pseudonym abort the build.
#[derive(Debug, Clone)]
pub struct PseudonymMapping {
    class: IdentityClass,
    entries: Vec<PseudonymEntry>,
    by_key: HashMap<String, usize>,
}

impl PseudonymMapping {
    pub(crate) fn new(class: IdentityClass) -> Self {
        Self {
            class,
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, entry: PseudonymEntry) {
        self.by_key
            .insert(entry.record.natural_key.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn class(&self) -> IdentityClass {
        self.class
    }

    /// Pseudonym for a natural key, if the key is covered by this mapping
    pub fn pseudonym_for(&self, natural_key: &str) -> Option<&str> {
        self.by_key
            .get(natural_key)
            .map(|&i| self.entries[i].pseudonym.as_str())
    }

    pub fn contains(&self, natural_key: &str) -> bool {
        self.by_key.contains_key(natural_key)
    }

    pub fn entries(&self) -> &[PseudonymEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The closed set of operations the bridge exposes to the agent
///
/// Decoded exactly once at the bridge boundary from the `name` + `input` of
/// a tool-use block; an unknown name fails decoding instead of reaching
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "input", rename_all = "snake_case")]
pub enum ToolCall {
    /// Structural definition (table/view SQL) of the anonymous store
    GetSchema {
        /// Echo field present in the wire schema; carries no information
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },

    /// Column names for one table of the anonymous store
    GetTableInfo { table_id: String },

    /// A read query executed verbatim against the anonymous store
    SqlQuery { query: String },

    /// Final narrative carrying zero or more template markers; terminal
    TemplateResponse { final_response: String },
}

impl ToolCall {
    /// Decode a tool-use block into the closed call vocabulary
    pub fn decode(name: &str, input: serde_json::Value) -> Result<Self> {
        let tagged = serde_json::json!({ "name": name, "input": input });
        serde_json::from_value(tagged).map_err(KalypsoError::from)
    }

    /// Wire name of the operation, for transcripts and logging
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::GetSchema { .. } => "get_schema",
            ToolCall::GetTableInfo { .. } => "get_table_info",
            ToolCall::SqlQuery { .. } => "sql_query",
            ToolCall::TemplateResponse { .. } => "template_response",
        }
    }

    /// Whether this operation ends the conversation turn by convention
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCall::TemplateResponse { .. })
    }
}

/// Outcome of one dispatched operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Text fed back into the agent's context (results and diagnostics)
    Result(String),

    /// Terminal template resolution. `original` (markers intact) is what the
    /// agent's context may see; `resolved` is what reaches the human.
    Final { resolved: String, original: String },
}

/// Per-turn state machine the conversation loop drives
///
/// `AWAITING_CALL -> DISPATCHING -> (RESULT_READY | TEMPLATE_RESOLVED |
/// ERROR) -> AWAITING_CALL` looping, or `-> DONE` on a non-function response
/// or a template resolution. One operation runs to completion before the
/// next is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingCall,
    Dispatching,
    ResultReady,
    TemplateResolved,
    Error,
    Done,
}

impl TurnState {
    /// Enter dispatch; only legal while awaiting a call
    pub fn begin_dispatch(self) -> Result<Self> {
        match self {
            TurnState::AwaitingCall => Ok(TurnState::Dispatching),
            other => Err(KalypsoError::Other(format!(
                "cannot dispatch while in state {:?}",
                other
            ))),
        }
    }

    /// Record the outcome of a completed dispatch
    pub fn complete(self, outcome: &Dispatch) -> Self {
        match outcome {
            Dispatch::Result(_) => TurnState::ResultReady,
            Dispatch::Final { .. } => TurnState::TemplateResolved,
        }
    }

    /// Advance past a delivered outcome
    pub fn acknowledge(self) -> Self {
        match self {
            TurnState::ResultReady | TurnState::Error => TurnState::AwaitingCall,
            TurnState::TemplateResolved | TurnState::Done => TurnState::Done,
            s => s,
        }
    }
}
