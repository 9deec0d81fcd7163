//! Shared fixtures for integration tests

use kalypso::Settings;
use rusqlite::Connection;
use std::path::Path;

/// Build a small but realistic source store: three students across two
/// classes, two teachers, and a handful of assessment results.
pub fn build_source_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE students (
             StudentID        INTEGER,
             StudentFirstName TEXT,
             StudentLastName  TEXT,
             Grade            INTEGER
         );
         CREATE TABLE teachers (
             StudentID   INTEGER,
             TeacherName TEXT,
             ClassName   TEXT
         );
         CREATE TABLE results (
             StudentID      INTEGER,
             Subject        TEXT,
             TestRITScore   INTEGER,
             TestPercentile INTEGER
         );

         INSERT INTO students VALUES (1001, 'Ada', 'Lovelace', 6);
         INSERT INTO students VALUES (1002, 'Bo', 'Chen', 6);
         INSERT INTO students VALUES (1003, 'Amara', 'Okafor', 7);

         INSERT INTO teachers VALUES (1001, 'Mr. Han', 'Math 6');
         INSERT INTO teachers VALUES (1002, 'Mr. Han', 'Math 6');
         INSERT INTO teachers VALUES (1003, 'Ms. Reyes', 'Math 7');

         INSERT INTO results VALUES (1001, 'Math', 215, 82);
         INSERT INTO results VALUES (1001, 'Reading', 208, 70);
         INSERT INTO results VALUES (1002, 'Math', 199, 48);
         INSERT INTO results VALUES (1003, 'Math', 221, 90);",
    )
    .unwrap();
}

/// Settings pointing both stores into a fresh temp directory, with the
/// source store already populated
pub fn fixture_settings() -> (tempfile::TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        private_db_path: dir.path().join("private.db"),
        anon_db_path: dir.path().join("anon.db"),
        ..Settings::default()
    };
    build_source_store(&settings.private_db_path);
    (dir, settings)
}
