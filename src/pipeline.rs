//! End-to-end anonymization pipeline
//!
//! `prepare` turns a private source store into a queryable anonymous store:
//! mirror, strip stale registry tables, redact display columns, build and
//! persist the pseudonym mappings, then substitute every identity-reference
//! column. Order matters: redaction must land before substitution so no
//! intermediate state pairs a real name with a pseudonym, and the mappings
//! are persisted before substitution so a crash mid-rewrite never orphans
//! pseudonyms that cannot be resolved.
//!
//! `verify` is the independent check an operator runs afterwards: it scans
//! the anonymous store for unredacted display text and for natural keys that
//! survived substitution.

use crate::config::Settings;
use crate::error::Result;
use crate::keys;
use crate::store::registry::KeyRegistry;
use crate::store::substitute::{self, SubstitutionReport};
use crate::store::{mirror, AnonStore, PrivateStore};
use crate::types::IdentityClass;
use std::collections::HashSet;
use tracing::{info, warn};

/// Auditable result of one `prepare` run
#[derive(Debug)]
pub struct PrepareReport {
    /// Students covered by the persisted mapping
    pub students: usize,

    /// Teachers covered by the persisted mapping
    pub teachers: usize,

    /// What the substitution engine rewrote
    pub substitution: SubstitutionReport,
}

/// Build the anonymous store from the private source store
///
/// Any failure after the mirror lands discards the anonymous store file, so
/// a half-anonymized store never survives to be queried.
pub fn prepare(settings: &Settings) -> Result<PrepareReport> {
    let private = PrivateStore::new(&settings.private_db_path);
    let anon = AnonStore::new(&settings.anon_db_path);

    mirror::mirror_store(&settings.private_db_path, &settings.anon_db_path)?;

    match anonymize(&private, &anon) {
        Ok(report) => {
            info!(
                "Prepared anonymous store: {} students, {} teachers, {} rows substituted",
                report.students,
                report.teachers,
                report.substitution.rows_updated()
            );
            Ok(report)
        }
        Err(e) => {
            if anon.path().exists() {
                if let Err(rm) = std::fs::remove_file(anon.path()) {
                    warn!(
                        "Failed to discard partial anonymous store {}: {}",
                        anon.path().display(),
                        rm
                    );
                }
            }
            Err(e)
        }
    }
}

fn anonymize(private: &PrivateStore, anon: &AnonStore) -> Result<PrepareReport> {
    // A source store that already went through a run carries key tables;
    // they must never reach the anonymous side.
    mirror::drop_registry_tables(anon)?;
    mirror::redact_display_columns(anon)?;

    let students = keys::load_student_roster(private)?;
    let teachers = keys::load_teacher_roster(private)?;
    let student_mapping = keys::build_mapping(IdentityClass::Student, &students)?;
    let teacher_mapping = keys::build_mapping(IdentityClass::Teacher, &teachers)?;

    let registry = KeyRegistry::new(private.clone());
    registry.save(&student_mapping)?;
    registry.save(&teacher_mapping)?;

    let counts = (student_mapping.len(), teacher_mapping.len());
    let substitution = substitute::apply(anon, &[student_mapping, teacher_mapping])?;

    Ok(PrepareReport {
        students: counts.0,
        teachers: counts.1,
        substitution,
    })
}

/// A natural key found intact in the anonymous store after substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedKey {
    pub class: IdentityClass,
    pub table: String,
    pub column: String,
}

/// Result of the post-run verification scan
#[derive(Debug)]
pub struct VerifyReport {
    /// Rows whose display columns still carry something other than the
    /// sentinel
    pub unredacted_rows: usize,

    /// Reference columns where a registry-known natural key survived
    pub leaked_keys: Vec<LeakedKey>,

    /// Substitution epoch recorded in the store, if any
    pub epoch: Option<String>,
}

impl VerifyReport {
    /// Fully redacted, fully substituted, and marked as such
    pub fn is_clean(&self) -> bool {
        self.unredacted_rows == 0 && self.leaked_keys.is_empty() && self.epoch.is_some()
    }
}

/// Scan the anonymous store for anything anonymization should have removed
pub fn verify(settings: &Settings) -> Result<VerifyReport> {
    let private = PrivateStore::new(&settings.private_db_path);
    let anon = AnonStore::new(&settings.anon_db_path);
    let registry = KeyRegistry::new(private);

    let unredacted_rows = mirror::unredacted_rows(&anon)?;

    let conn = anon.connect()?;
    let epoch = substitute::current_epoch(&conn)?;
    let targets = substitute::discover_targets(&conn)?;

    let mut leaked_keys = Vec::new();
    for class in [IdentityClass::Student, IdentityClass::Teacher] {
        let known: HashSet<String> = registry.natural_keys(class)?.into_iter().collect();
        if known.is_empty() {
            continue;
        }
        for target in targets.iter().filter(|t| t.class == class) {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT DISTINCT "{}" FROM "{}" WHERE "{}" IS NOT NULL"#,
                target.column, target.table, target.column
            ))?;
            let values = stmt
                .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let survived = values
                .iter()
                .filter_map(crate::store::canonical_key)
                .any(|v| known.contains(&v));
            if survived {
                warn!(
                    "Natural {} key survived in {}.{}",
                    class, target.table, target.column
                );
                leaked_keys.push(LeakedKey {
                    class,
                    table: target.table.clone(),
                    column: target.column.clone(),
                });
            }
        }
    }

    Ok(VerifyReport {
        unredacted_rows,
        leaked_keys,
        epoch,
    })
}
