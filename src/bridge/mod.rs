//! Tool Dispatch Bridge
//!
//! The single trusted mediator between the external reasoning agent and the
//! two stores. Exactly four operations exist, decoded into [`ToolCall`]
//! before they get here; three run against the anonymous store, and only
//! `template_response` reads the private key registry. No other path to
//! either store is reachable from the agent side.
//!
//! Query failures are contained at this boundary: a malformed `sql_query`
//! yields a retriable diagnostic string for the agent, never an error that
//! crosses the bridge.

pub mod template;

use crate::error::{KalypsoError, Result};
use crate::store::registry::KeyRegistry;
use crate::store::AnonStore;
use crate::types::{Dispatch, ToolCall};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, warn};

/// Caller-facing diagnostic returned when a query cannot be executed.
/// Surfaced to the agent so the conversation can retry with a better query.
pub const QUERY_RETRY_DIAGNOSTIC: &str = "We're having trouble running this SQL query. This \
could be due to an invalid query or the structure of the data. Try rephrasing your question \
to help the model generate a valid query for the database.";

/// Dispatcher over the anonymous store and the private key registry
pub struct Bridge {
    anon: AnonStore,
    registry: KeyRegistry,
}

impl Bridge {
    pub fn new(anon: AnonStore, registry: KeyRegistry) -> Self {
        Self { anon, registry }
    }

    /// Execute one decoded operation to completion
    pub fn dispatch(&self, call: &ToolCall) -> Result<Dispatch> {
        debug!("Dispatching {}", call.name());
        match call {
            ToolCall::GetSchema { .. } => self.get_schema().map(Dispatch::Result),
            ToolCall::GetTableInfo { table_id } => {
                self.get_table_info(table_id).map(Dispatch::Result)
            }
            ToolCall::SqlQuery { query } => self.sql_query(query).map(Dispatch::Result),
            ToolCall::TemplateResponse { final_response } => {
                let resolved = template::resolve_template(final_response, &self.registry)?;
                Ok(Dispatch::Final {
                    resolved,
                    original: final_response.clone(),
                })
            }
        }
    }

    /// Structural definition of the anonymous store: cleaned table/view SQL
    fn get_schema(&self) -> Result<String> {
        let conn = self.anon.connect()?;
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE type IN ('table', 'view') AND sql IS NOT NULL",
        )?;
        let statements = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let cleaned: Vec<String> = statements
            .iter()
            .map(|sql| sql.replace("\\n", "\n").replace('\\', "").trim().to_string())
            .collect();

        if cleaned.is_empty() {
            return Err(KalypsoError::Other(
                "anonymous store has no tables or views".to_string(),
            ));
        }
        Ok(cleaned.join("\n\n"))
    }

    /// Column names for one table of the anonymous store
    fn get_table_info(&self, table_id: &str) -> Result<String> {
        let conn = self.anon.connect()?;
        let mut columns: Vec<String> = Vec::new();
        conn.pragma(None, "table_info", table_id, |row| {
            columns.push(row.get(1)?);
            Ok(())
        })?;

        if columns.is_empty() {
            return Err(KalypsoError::UnknownTable(table_id.to_string()));
        }
        Ok(columns.join(", "))
    }

    /// Execute the agent's query verbatim against the anonymous store
    ///
    /// The query string gets the same whitespace cleanup the agent-generated
    /// queries have always needed; execution failure becomes the retry
    /// diagnostic, not an error.
    fn sql_query(&self, query: &str) -> Result<String> {
        let conn = self.anon.connect()?;
        let cleaned = query
            .replace("\\n", " ")
            .replace('\n', " ")
            .replace('\\', "")
            .trim()
            .to_string();
        debug!("Executing agent query: {}", cleaned);

        match run_query(&conn, &cleaned) {
            Ok(rendered) => Ok(rendered),
            Err(e) => {
                warn!("Agent query failed ({}); returning retry diagnostic", e);
                Ok(QUERY_RETRY_DIAGNOSTIC.to_string())
            }
        }
    }
}

/// Run a query and render the rows as a JSON array of records
fn run_query(conn: &Connection, query: &str) -> Result<String> {
    let mut stmt = conn.prepare(query)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();

    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            record.insert(name.clone(), cell_to_json(row.get_ref(i)?));
        }
        records.push(serde_json::Value::Object(record));
    }

    Ok(serde_json::to_string_pretty(&records)?)
}

fn cell_to_json(cell: ValueRef<'_>) -> serde_json::Value {
    match cell {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::build_mapping;
    use crate::store::PrivateStore;
    use crate::types::{IdentityClass, IdentityRecord};

    fn bridge() -> (tempfile::TempDir, Bridge) {
        let dir = tempfile::tempdir().unwrap();

        let anon = AnonStore::new(dir.path().join("anon.db"));
        let conn = anon.connect().unwrap();
        conn.execute_batch(
            "CREATE TABLE results (StudentID TEXT, Subject TEXT, TestRITScore INTEGER);
             INSERT INTO results VALUES ('aaa', 'Math', 210);
             INSERT INTO results VALUES ('bbb', 'Math', 199);
             CREATE VIEW math_results AS SELECT * FROM results WHERE Subject = 'Math';",
        )
        .unwrap();
        drop(conn);

        let private = PrivateStore::new(dir.path().join("private.db"));
        private.connect().unwrap();
        let registry = KeyRegistry::new(private);
        let records = vec![IdentityRecord {
            natural_key: "1001".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
        }];
        registry
            .save(&build_mapping(IdentityClass::Student, &records).unwrap())
            .unwrap();
        registry
            .save(&build_mapping(IdentityClass::Teacher, &[]).unwrap())
            .unwrap();

        (dir, Bridge::new(anon, registry))
    }

    #[test]
    fn test_get_schema_lists_tables_and_views() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::GetSchema { action: None };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Result(schema) => {
                assert!(schema.contains("CREATE TABLE results"));
                assert!(schema.contains("math_results"));
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_get_table_info_returns_columns() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::GetTableInfo {
            table_id: "results".to_string(),
        };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Result(columns) => {
                assert_eq!(columns, "StudentID, Subject, TestRITScore");
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_get_table_info_unknown_table() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::GetTableInfo {
            table_id: "nope".to_string(),
        };
        let err = bridge.dispatch(&call).unwrap_err();
        assert!(matches!(err, KalypsoError::UnknownTable(t) if t == "nope"));
    }

    #[test]
    fn test_sql_query_returns_json_records() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::SqlQuery {
            query: "SELECT StudentID, TestRITScore FROM results ORDER BY TestRITScore"
                .to_string(),
        };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Result(rendered) => {
                let rows: serde_json::Value = serde_json::from_str(&rendered).unwrap();
                assert_eq!(rows[0]["StudentID"], "bbb");
                assert_eq!(rows[0]["TestRITScore"], 199);
                assert_eq!(rows[1]["TestRITScore"], 210);
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_query_yields_retry_diagnostic() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::SqlQuery {
            query: "SELEKT * FROM results".to_string(),
        };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Result(out) => assert_eq!(out, QUERY_RETRY_DIAGNOSTIC),
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_query_cleanup_strips_escaped_newlines() {
        let (_dir, bridge) = bridge();
        let call = ToolCall::SqlQuery {
            query: "SELECT\\nCOUNT(*) AS n\nFROM results".to_string(),
        };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Result(rendered) => {
                let rows: serde_json::Value = serde_json::from_str(&rendered).unwrap();
                assert_eq!(rows[0]["n"], 2);
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_template_response_is_terminal_and_resolved() {
        let (_dir, bridge) = bridge();
        let pseudonym = crate::keys::pseudonymize("1001");
        let call = ToolCall::TemplateResponse {
            final_response: format!("Top scorer: {{s{{{}}}}}.", pseudonym),
        };
        match bridge.dispatch(&call).unwrap() {
            Dispatch::Final { resolved, original } => {
                assert_eq!(resolved, "Top scorer: Ada Lovelace.");
                assert!(original.contains(&pseudonym));
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }
}
