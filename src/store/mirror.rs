//! Store Mirror & Redactor
//!
//! Produces a byte-for-byte copy of the source store via the SQLite online
//! backup API, then irreversibly blanks every identity-display column and
//! strips any registry tables the source happened to carry. After
//! [`redact_display_columns`] the anonymous store contains no display-text
//! PII; identity-reference columns still hold natural keys until the
//! substitution engine runs.

use crate::error::{KalypsoError, Result};
use crate::store::AnonStore;
use crate::types::{IdentityClass, SENTINEL};
use rusqlite::{backup::Backup, Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Identity-display columns, blanked to the sentinel during redaction.
/// `TeacherName` is deliberately absent: it is the teacher natural key and
/// is rewritten to a pseudonym by the substitution engine instead.
const DISPLAY_COLUMNS: &[(&str, &str)] = &[
    ("students", "StudentFirstName"),
    ("students", "StudentLastName"),
];

/// Copy the source store into `dest`
///
/// The source is opened read-only; the caller guarantees it is closed for
/// writes for the duration. On any failure the partially written destination
/// is removed before the error propagates, so a broken copy is never left
/// looking complete.
pub fn mirror_store(src: &Path, dest: &Path) -> Result<()> {
    info!("Mirroring {} -> {}", src.display(), dest.display());

    match run_backup(src, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            if dest.exists() {
                if let Err(rm) = std::fs::remove_file(dest) {
                    warn!("Failed to discard partial mirror {}: {}", dest.display(), rm);
                }
            }
            Err(e)
        }
    }
}

fn run_backup(src: &Path, dest: &Path) -> Result<()> {
    let src_conn = Connection::open_with_flags(src, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| {
            KalypsoError::MirrorIo(format!("cannot read source store {}: {}", src.display(), e))
        })?;
    let mut dest_conn = Connection::open(dest).map_err(|e| {
        KalypsoError::MirrorIo(format!(
            "cannot write destination store {}: {}",
            dest.display(),
            e
        ))
    })?;

    let backup = Backup::new(&src_conn, &mut dest_conn)
        .map_err(|e| KalypsoError::MirrorIo(format!("backup init failed: {}", e)))?;
    backup
        .run_to_completion(128, Duration::from_millis(50), None)
        .map_err(|e| KalypsoError::MirrorIo(format!("backup failed: {}", e)))?;
    Ok(())
}

/// Blank every identity-display column to the sentinel, in one transaction
pub fn redact_display_columns(store: &AnonStore) -> Result<()> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;

    for (table, column) in DISPLAY_COLUMNS {
        let updated = tx.execute(
            &format!(r#"UPDATE "{}" SET "{}" = ?1"#, table, column),
            [SENTINEL],
        )?;
        info!("Redacted {} rows of {}.{}", updated, table, column);
    }

    tx.commit()?;
    Ok(())
}

/// Count rows still carrying non-sentinel text in an identity-display column
pub fn unredacted_rows(store: &AnonStore) -> Result<usize> {
    let conn = store.connect()?;
    let mut total = 0usize;
    for (table, column) in DISPLAY_COLUMNS {
        let count: i64 = conn.query_row(
            &format!(
                r#"SELECT COUNT(*) FROM "{}" WHERE "{}" IS NOT NULL AND "{}" != ?1"#,
                table, column, column
            ),
            [SENTINEL],
            |r| r.get(0),
        )?;
        total += count as usize;
    }
    Ok(total)
}

/// Drop key-registry tables from the anonymous store
///
/// A source store that has been through a previous run carries `student_key`
/// and `teacher_key`; the mirror must not expose them.
pub fn drop_registry_tables(store: &AnonStore) -> Result<()> {
    let conn = store.connect()?;
    for class in [IdentityClass::Student, IdentityClass::Teacher] {
        conn.execute_batch(&format!(r#"DROP TABLE IF EXISTS "{}";"#, class.key_table()))?;
    }
    Ok(())
}
