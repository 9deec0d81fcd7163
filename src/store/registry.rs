//! Key registry persistence and lookup
//!
//! The registry is the private store's record of every pseudonym mapping:
//! one table per identity class, rebuilt wholesale on each anonymization run
//! and read-only afterwards. Template resolution is the only consumer of the
//! lookup path, and it only ever turns a pseudonym back into a display name.

use crate::error::Result;
use crate::store::PrivateStore;
use crate::types::{IdentityClass, PseudonymMapping};
use rusqlite::OptionalExtension;
use tracing::{debug, info};

/// Read/write access to the pseudonym key tables in the private store
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    store: PrivateStore,
}

impl KeyRegistry {
    pub fn new(store: PrivateStore) -> Self {
        Self { store }
    }

    /// Persist a mapping, replacing any previous run's table for the class
    pub fn save(&self, mapping: &PseudonymMapping) -> Result<()> {
        let mut conn = self.store.connect()?;
        let tx = conn.transaction()?;

        match mapping.class() {
            IdentityClass::Student => {
                tx.execute_batch(
                    "DROP TABLE IF EXISTS student_key;
                     CREATE TABLE student_key (
                         StudentID        TEXT PRIMARY KEY,
                         StudentFirstName TEXT,
                         StudentLastName  TEXT,
                         HashStudentID    TEXT NOT NULL UNIQUE
                     );",
                )?;
                let mut stmt = tx.prepare(
                    "INSERT INTO student_key
                     (StudentID, StudentFirstName, StudentLastName, HashStudentID)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in mapping.entries() {
                    stmt.execute((
                        &entry.record.natural_key,
                        &entry.record.first_name,
                        &entry.record.last_name,
                        &entry.pseudonym,
                    ))?;
                }
            }
            IdentityClass::Teacher => {
                tx.execute_batch(
                    "DROP TABLE IF EXISTS teacher_key;
                     CREATE TABLE teacher_key (
                         TeacherName     TEXT PRIMARY KEY,
                         HashTeacherName TEXT NOT NULL UNIQUE
                     );",
                )?;
                let mut stmt = tx.prepare(
                    "INSERT INTO teacher_key (TeacherName, HashTeacherName) VALUES (?1, ?2)",
                )?;
                for entry in mapping.entries() {
                    stmt.execute((&entry.record.natural_key, &entry.pseudonym))?;
                }
            }
        }

        tx.commit()?;
        info!(
            "Saved {} mapping ({} entries) to {}",
            mapping.class(),
            mapping.len(),
            mapping.class().key_table()
        );
        Ok(())
    }

    /// Resolve a pseudonym to its display name, if the registry knows it
    pub fn resolve(&self, class: IdentityClass, pseudonym: &str) -> Result<Option<String>> {
        let conn = self.store.connect_read_only()?;
        let name = match class {
            IdentityClass::Student => conn
                .query_row(
                    "SELECT StudentFirstName, StudentLastName FROM student_key
                     WHERE HashStudentID = ?1",
                    [pseudonym],
                    |row| {
                        let first: Option<String> = row.get(0)?;
                        let last: Option<String> = row.get(1)?;
                        Ok(match (first, last) {
                            (Some(f), Some(l)) => format!("{} {}", f, l),
                            (Some(f), None) => f,
                            (None, Some(l)) => l,
                            (None, None) => String::new(),
                        })
                    },
                )
                .optional()?,
            IdentityClass::Teacher => conn
                .query_row(
                    "SELECT TeacherName FROM teacher_key WHERE HashTeacherName = ?1",
                    [pseudonym],
                    |row| row.get(0),
                )
                .optional()?,
        };
        debug!(
            "Registry lookup for {} pseudonym {}: {}",
            class,
            pseudonym,
            if name.is_some() { "hit" } else { "miss" }
        );
        Ok(name)
    }

    /// All natural keys recorded for a class (used by the verify scan)
    pub fn natural_keys(&self, class: IdentityClass) -> Result<Vec<String>> {
        let conn = self.store.connect_read_only()?;
        let column = class.reference_column();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT "{}" FROM "{}""#,
            column,
            class.key_table()
        ))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
