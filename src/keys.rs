//! Identity Key Builder
//!
//! Derives one-way pseudonyms for every distinct natural key of an identity
//! class and assembles the forward mapping. The mapping is checked for
//! injectivity as it is built: two distinct keys landing on the same
//! pseudonym abort the run, because pseudonyms become the only identifier
//! the outside world ever sees.
//!
//! Persistence is the caller's job (`store::registry`); this module has no
//! side effects beyond reading rosters.

use crate::error::{KalypsoError, Result};
use crate::store::{canonical_key, PrivateStore};
use crate::types::{IdentityClass, IdentityRecord, PseudonymEntry, PseudonymMapping};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Deterministic one-way pseudonym for a canonical natural-key string
///
/// Lowercase hex SHA-256, stable across runs. Class scoping comes from the
/// caller feeding each class its own key space, not from the hash.
pub fn pseudonymize(natural_key: &str) -> String {
    hex::encode(Sha256::digest(natural_key.as_bytes()))
}

/// Build the pseudonym mapping for one identity class
///
/// Rejects records with an empty natural key (`MalformedIdentity`), collapses
/// duplicate keys to one entry, and fails with `PseudonymCollision` if two
/// distinct keys produce the same pseudonym. Collision policy is abort, not
/// re-salt: re-salting would change pseudonyms between runs and silently
/// break determinism.
pub fn build_mapping(
    class: IdentityClass,
    records: &[IdentityRecord],
) -> Result<PseudonymMapping> {
    build_mapping_with(class, records, pseudonymize)
}

/// Mapping construction over an explicit pseudonym function.
///
/// The seam exists so the collision path is exercisable in tests; production
/// callers go through [`build_mapping`].
pub fn build_mapping_with<F>(
    class: IdentityClass,
    records: &[IdentityRecord],
    derive: F,
) -> Result<PseudonymMapping>
where
    F: Fn(&str) -> String,
{
    let mut mapping = PseudonymMapping::new(class);
    let mut owner_of: HashMap<String, String> = HashMap::new();

    for record in records {
        let key = record.natural_key.trim();
        if key.is_empty() {
            return Err(KalypsoError::MalformedIdentity(format!(
                "{} record is missing its natural key",
                class
            )));
        }

        if mapping.contains(key) {
            // Same key appearing twice is not a violation; it maps to the
            // same pseudonym either way.
            continue;
        }

        let pseudonym = derive(key);
        if let Some(existing) = owner_of.get(&pseudonym) {
            return Err(KalypsoError::PseudonymCollision {
                class,
                first: existing.clone(),
                second: key.to_string(),
                pseudonym,
            });
        }
        owner_of.insert(pseudonym.clone(), key.to_string());

        mapping.insert(PseudonymEntry {
            record: IdentityRecord {
                natural_key: key.to_string(),
                first_name: record.first_name.clone(),
                last_name: record.last_name.clone(),
            },
            pseudonym,
        });
    }

    debug!(
        "Built {} mapping covering {} identities",
        class,
        mapping.len()
    );
    Ok(mapping)
}

/// Load the student roster from the private store
///
/// Requires `StudentID`, `StudentFirstName`, and `StudentLastName` on the
/// `students` table. Rows with a NULL key are skipped with a warning so one
/// bad export row does not abort the run.
pub fn load_student_roster(store: &PrivateStore) -> Result<Vec<IdentityRecord>> {
    let conn = store.connect_read_only()?;
    let mut stmt = conn
        .prepare("SELECT StudentID, StudentFirstName, StudentLastName FROM students")
        .map_err(|e| {
            KalypsoError::MalformedIdentity(format!(
                "students table must contain StudentID, StudentFirstName, \
                 and StudentLastName columns: {}",
                e
            ))
        })?;

    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let key_value: rusqlite::types::Value = row.get(0)?;
        let Some(natural_key) = canonical_key(&key_value) else {
            warn!("Skipping student row with NULL StudentID");
            continue;
        };
        records.push(IdentityRecord {
            natural_key,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
        });
    }
    Ok(records)
}

/// Load the teacher roster from the private store
///
/// Teachers are keyed by `TeacherName` on the `teachers` table; the name is
/// both natural key and display attribute.
pub fn load_teacher_roster(store: &PrivateStore) -> Result<Vec<IdentityRecord>> {
    let conn = store.connect_read_only()?;
    let mut stmt = conn
        .prepare("SELECT DISTINCT TeacherName FROM teachers")
        .map_err(|e| {
            KalypsoError::MalformedIdentity(format!(
                "teachers table must contain a TeacherName column: {}",
                e
            ))
        })?;

    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let key_value: rusqlite::types::Value = row.get(0)?;
        let Some(natural_key) = canonical_key(&key_value) else {
            warn!("Skipping teacher row with NULL TeacherName");
            continue;
        };
        records.push(IdentityRecord {
            natural_key,
            first_name: None,
            last_name: None,
        });
    }
    Ok(records)
}
