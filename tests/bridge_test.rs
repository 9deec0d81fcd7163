//! Integration tests for the tool dispatch bridge over a prepared store
//!
//! These exercise the full path the agent sees: prepare the stores, then
//! drive the four bridge operations and check that nothing private crosses
//! the boundary until template resolution.

mod common;

use kalypso::bridge::QUERY_RETRY_DIAGNOSTIC;
use kalypso::keys::pseudonymize;
use kalypso::types::Dispatch;
use kalypso::{pipeline, AnonStore, Bridge, KeyRegistry, PrivateStore, ToolCall};
use serde_json::json;

fn prepared_bridge() -> (tempfile::TempDir, Bridge) {
    let (dir, settings) = common::fixture_settings();
    pipeline::prepare(&settings).unwrap();

    let anon = AnonStore::new(&settings.anon_db_path);
    let registry = KeyRegistry::new(PrivateStore::new(&settings.private_db_path));
    (dir, Bridge::new(anon, registry))
}

fn result_of(bridge: &Bridge, call: ToolCall) -> String {
    match bridge.dispatch(&call).unwrap() {
        Dispatch::Result(out) => out,
        other => panic!("expected a result dispatch, got {:?}", other),
    }
}

#[test]
fn test_schema_shows_data_tables_but_no_registry() {
    let (_dir, bridge) = prepared_bridge();
    let schema = result_of(&bridge, ToolCall::GetSchema { action: None });

    assert!(schema.contains("CREATE TABLE students"));
    assert!(schema.contains("CREATE TABLE results"));
    assert!(!schema.contains("student_key"));
    assert!(!schema.contains("teacher_key"));
}

#[test]
fn test_table_info_lists_columns() {
    let (_dir, bridge) = prepared_bridge();
    let columns = result_of(
        &bridge,
        ToolCall::GetTableInfo {
            table_id: "results".to_string(),
        },
    );
    assert_eq!(columns, "StudentID, Subject, TestRITScore, TestPercentile");
}

#[test]
fn test_query_results_carry_only_pseudonyms() {
    let (_dir, bridge) = prepared_bridge();
    let rendered = result_of(
        &bridge,
        ToolCall::SqlQuery {
            query: "SELECT StudentID, TestRITScore FROM results ORDER BY TestRITScore DESC"
                .to_string(),
        },
    );

    let rows: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(rows[0]["TestRITScore"], 221);
    assert_eq!(rows[0]["StudentID"], json!(pseudonymize("1003")));

    for name in ["Ada", "Lovelace", "Mr. Han", "1001"] {
        assert!(
            !rendered.contains(name),
            "query result leaked {:?}",
            name
        );
    }
}

#[test]
fn test_bad_query_comes_back_as_diagnostic() {
    let (_dir, bridge) = prepared_bridge();
    let out = result_of(
        &bridge,
        ToolCall::SqlQuery {
            query: "SELECT nope FROM nothing".to_string(),
        },
    );
    assert_eq!(out, QUERY_RETRY_DIAGNOSTIC);
}

#[test]
fn test_template_resolution_restores_names_on_the_way_out() {
    let (_dir, bridge) = prepared_bridge();
    let narrative = format!(
        "{{t{{{}}}}} teaches {{s{{{}}}}} and {{s{{{}}}}}.",
        pseudonymize("Mr. Han"),
        pseudonymize("1001"),
        pseudonymize("1002"),
    );

    let call = ToolCall::TemplateResponse {
        final_response: narrative.clone(),
    };
    match bridge.dispatch(&call).unwrap() {
        Dispatch::Final { resolved, original } => {
            assert_eq!(resolved, "Mr. Han teaches Ada Lovelace and Bo Chen.");
            assert_eq!(original, narrative);
        }
        other => panic!("expected a final dispatch, got {:?}", other),
    }
}

#[test]
fn test_unknown_pseudonym_stays_masked() {
    let (_dir, bridge) = prepared_bridge();
    let call = ToolCall::TemplateResponse {
        final_response: "Top scorer: {s{deadbeef}}.".to_string(),
    };
    match bridge.dispatch(&call).unwrap() {
        Dispatch::Final { resolved, .. } => {
            assert_eq!(resolved, "Top scorer: {s{deadbeef}}.");
        }
        other => panic!("expected a final dispatch, got {:?}", other),
    }
}

#[test]
fn test_decode_rejects_calls_outside_the_vocabulary() {
    assert!(ToolCall::decode("drop_table", json!({"table_id": "students"})).is_err());
    assert!(ToolCall::decode("sql_query", json!({})).is_err());

    let call = ToolCall::decode("sql_query", json!({"query": "SELECT 1"})).unwrap();
    assert_eq!(call.name(), "sql_query");
}
