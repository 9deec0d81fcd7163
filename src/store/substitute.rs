//! Referential Substitution Engine
//!
//! Rewrites every identity-reference column in the anonymous store so that
//! each natural key is replaced by its pseudonym, consistently across all
//! tables. Substitution targets are discovered from the store's own schema:
//! any user-table column named after a class's reference column is rewritten
//! with that class's mapping.
//!
//! Each (table, mapping) pair is applied in a single transaction, so a
//! mapping either rewrites all its rows in a table or none. The engine is
//! not idempotent-by-construction: a one-row `substitution_epoch` marker is
//! written after a successful run, and a store already carrying the marker
//! is rejected instead of being substituted twice.

use crate::error::{KalypsoError, Result};
use crate::store::{canonical_key, AnonStore};
use crate::types::{IdentityClass, PseudonymMapping};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker table recording that substitution has run against this store
pub const EPOCH_TABLE: &str = "substitution_epoch";

/// One identity-reference column scheduled for rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionTarget {
    pub table: String,
    pub column: String,
    pub class: IdentityClass,
}

/// Outcome of one target's rewrite
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub table: String,
    pub column: String,
    pub class: IdentityClass,
    /// Distinct values that had a mapping entry
    pub values_mapped: usize,
    /// Total rows rewritten
    pub rows_updated: usize,
}

/// A value found in a reference column with no mapping entry
///
/// Recoverable: not every identity appears in its class roster (a dropped
/// student, for example), so the value is left unchanged and surfaced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedValue {
    pub table: String,
    pub column: String,
    pub value: String,
}

/// Auditable result of one substitution run
#[derive(Debug, Clone)]
pub struct SubstitutionReport {
    pub epoch: String,
    pub targets: Vec<TargetReport>,
    pub unmapped: Vec<UnmappedValue>,
}

impl SubstitutionReport {
    pub fn rows_updated(&self) -> usize {
        self.targets.iter().map(|t| t.rows_updated).sum()
    }
}

/// Discover every identity-reference column in the store's user tables
pub fn discover_targets(conn: &Connection) -> Result<Vec<SubstitutionTarget>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut targets = Vec::new();
    for table in tables {
        if table == EPOCH_TABLE
            || table == IdentityClass::Student.key_table()
            || table == IdentityClass::Teacher.key_table()
        {
            continue;
        }
        let mut columns = Vec::new();
        conn.pragma(None, "table_info", &table, |row| {
            columns.push(row.get::<_, String>(1)?);
            Ok(())
        })?;
        for class in [IdentityClass::Student, IdentityClass::Teacher] {
            if columns.iter().any(|c| c == class.reference_column()) {
                targets.push(SubstitutionTarget {
                    table: table.clone(),
                    column: class.reference_column().to_string(),
                    class,
                });
            }
        }
    }
    Ok(targets)
}

/// Apply the supplied mappings across every discovered target
///
/// Fails with `AlreadySubstituted` if the store carries an epoch marker.
/// Values with no mapping entry are warned and left in place; everything
/// else is rewritten. Do not run concurrently against one store: the
/// all-rows-or-none guarantee holds per table transaction only.
pub fn apply(store: &AnonStore, mappings: &[PseudonymMapping]) -> Result<SubstitutionReport> {
    let mut conn = store.connect()?;

    if let Some(epoch) = current_epoch(&conn)? {
        return Err(KalypsoError::AlreadySubstituted(epoch));
    }

    let targets = discover_targets(&conn)?;
    debug!("Discovered {} substitution targets", targets.len());

    let mut target_reports = Vec::new();
    let mut unmapped = Vec::new();

    for mapping in mappings {
        for target in targets.iter().filter(|t| t.class == mapping.class()) {
            let report = apply_target(&mut conn, mapping, target, &mut unmapped)?;
            info!(
                "Substituted {}.{}: {} rows across {} values",
                report.table, report.column, report.rows_updated, report.values_mapped
            );
            target_reports.push(report);
        }
    }

    let epoch = write_epoch(&mut conn)?;
    info!("Substitution complete; epoch {}", epoch);

    Ok(SubstitutionReport {
        epoch,
        targets: target_reports,
        unmapped,
    })
}

/// Rewrite one (table, mapping) pair as a unit
fn apply_target(
    conn: &mut Connection,
    mapping: &PseudonymMapping,
    target: &SubstitutionTarget,
    unmapped: &mut Vec<UnmappedValue>,
) -> Result<TargetReport> {
    let tx = conn.transaction()?;
    let mut values_mapped = 0usize;
    let mut rows_updated = 0usize;

    {
        let mut select = tx.prepare(&format!(
            r#"SELECT DISTINCT "{}" FROM "{}" WHERE "{}" IS NOT NULL"#,
            target.column, target.table, target.column
        ))?;
        let values = select
            .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut update = tx.prepare(&format!(
            r#"UPDATE "{}" SET "{}" = ?1 WHERE "{}" = ?2"#,
            target.table, target.column, target.column
        ))?;

        for value in values {
            let Some(key) = canonical_key(&value) else {
                continue;
            };
            match mapping.pseudonym_for(&key) {
                Some(pseudonym) => {
                    rows_updated += update.execute(params![pseudonym, value])?;
                    values_mapped += 1;
                }
                None => {
                    warn!(
                        "Unmapped {} identity in {}.{}; value left unchanged",
                        mapping.class(),
                        target.table,
                        target.column
                    );
                    unmapped.push(UnmappedValue {
                        table: target.table.clone(),
                        column: target.column.clone(),
                        value: key,
                    });
                }
            }
        }
    }

    tx.commit()?;
    Ok(TargetReport {
        table: target.table.clone(),
        column: target.column.clone(),
        class: target.class,
        values_mapped,
        rows_updated,
    })
}

/// Epoch already recorded for this store, if any
pub fn current_epoch(conn: &Connection) -> Result<Option<String>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [EPOCH_TABLE],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(None);
    }
    let epoch: Option<String> = conn
        .query_row(
            &format!(r#"SELECT epoch FROM "{}" LIMIT 1"#, EPOCH_TABLE),
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(epoch)
}

fn write_epoch(conn: &mut Connection) -> Result<String> {
    let epoch = Uuid::new_v4().to_string();
    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        r#"CREATE TABLE "{}" (epoch TEXT NOT NULL, applied_at TEXT NOT NULL);"#,
        EPOCH_TABLE
    ))?;
    tx.execute(
        &format!(r#"INSERT INTO "{}" (epoch, applied_at) VALUES (?1, ?2)"#, EPOCH_TABLE),
        params![epoch, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    Ok(epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::build_mapping;
    use crate::types::IdentityRecord;

    fn fixture() -> (tempfile::TempDir, AnonStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anon.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE students (StudentID INTEGER, StudentFirstName TEXT, StudentLastName TEXT);
             CREATE TABLE results (StudentID INTEGER, TestRITScore INTEGER);
             CREATE TABLE teachers (StudentID INTEGER, TeacherName TEXT, ClassName TEXT);
             INSERT INTO students VALUES (1001, 'REDACTED', 'REDACTED');
             INSERT INTO students VALUES (1002, 'REDACTED', 'REDACTED');
             INSERT INTO results VALUES (1001, 210);
             INSERT INTO results VALUES (1001, 215);
             INSERT INTO results VALUES (1002, 199);
             INSERT INTO teachers VALUES (1001, 'Mr. Han', 'Math 6');
             INSERT INTO teachers VALUES (1002, 'Mr. Han', 'Math 6');",
        )
        .unwrap();
        drop(conn);
        (dir, AnonStore::new(path))
    }

    fn student_mapping() -> PseudonymMapping {
        let records = vec![
            IdentityRecord {
                natural_key: "1001".to_string(),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
            },
            IdentityRecord {
                natural_key: "1002".to_string(),
                first_name: Some("Bo".to_string()),
                last_name: Some("Chen".to_string()),
            },
        ];
        build_mapping(IdentityClass::Student, &records).unwrap()
    }

    fn teacher_mapping() -> PseudonymMapping {
        let records = vec![IdentityRecord {
            natural_key: "Mr. Han".to_string(),
            first_name: None,
            last_name: None,
        }];
        build_mapping(IdentityClass::Teacher, &records).unwrap()
    }

    #[test]
    fn test_discovery_finds_reference_columns() {
        let (_dir, store) = fixture();
        let conn = store.connect().unwrap();
        let targets = discover_targets(&conn).unwrap();

        // StudentID in students, results, and teachers; TeacherName in teachers
        let students: Vec<_> = targets
            .iter()
            .filter(|t| t.class == IdentityClass::Student)
            .map(|t| t.table.as_str())
            .collect();
        assert_eq!(students, vec!["results", "students", "teachers"]);

        assert!(targets
            .iter()
            .any(|t| t.class == IdentityClass::Teacher && t.table == "teachers"));
    }

    #[test]
    fn test_substitution_is_consistent_across_tables() {
        let (_dir, store) = fixture();
        let smap = student_mapping();
        let tmap = teacher_mapping();
        let report = apply(&store, &[smap.clone(), tmap]).unwrap();
        assert!(report.unmapped.is_empty());

        let conn = store.connect().unwrap();
        let expected = smap.pseudonym_for("1001").unwrap();
        let in_students: String = conn
            .query_row(
                "SELECT StudentID FROM students WHERE StudentLastName = 'REDACTED' LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let in_results: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM results WHERE StudentID = ?1",
                [expected],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(in_students.len(), 64);
        assert_eq!(in_results, 2);
    }

    #[test]
    fn test_unmapped_value_is_warned_not_fatal() {
        let (_dir, store) = fixture();
        {
            let conn = store.connect().unwrap();
            // A result row for a student who is not on the roster
            conn.execute("INSERT INTO results VALUES (9999, 188)", [])
                .unwrap();
        }

        let report = apply(&store, &[student_mapping(), teacher_mapping()]).unwrap();
        assert_eq!(report.unmapped.len(), 1);
        assert_eq!(report.unmapped[0].value, "9999");

        // The unmapped value is left in place untouched
        let conn = store.connect().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM results WHERE StudentID = 9999", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_second_run_is_rejected() {
        let (_dir, store) = fixture();
        let first = apply(&store, &[student_mapping(), teacher_mapping()]).unwrap();

        let err = apply(&store, &[student_mapping()]).unwrap_err();
        match err {
            KalypsoError::AlreadySubstituted(epoch) => assert_eq!(epoch, first.epoch),
            other => panic!("expected AlreadySubstituted, got {:?}", other),
        }

        // Pseudonyms were not double-hashed by the rejected run
        let conn = store.connect().unwrap();
        let smap = student_mapping();
        let expected = smap.pseudonym_for("1001").unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM results WHERE StudentID = ?1",
                [expected],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
