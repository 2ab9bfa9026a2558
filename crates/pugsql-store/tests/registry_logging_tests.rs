// Registry operations emit the canonical start/end events

use pugsql_core::logging_facility::test_capture::init_test_capture;
use pugsql_core::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START, FIELD_ERR_CODE};
use pugsql_store::{Record, Registry, RegistryConfig};

#[test]
fn test_load_logs_start_and_end_with_count() {
    // Given: Test capture installed
    let capture = init_test_capture();

    // When: Queries are loaded from a uniquely named source
    let mut db = Registry::open_in_memory(None).unwrap();
    db.load_queries_str("-- :name logged_a :one\nselect 1\n-- :name logged_b :one\nselect 2\n")
        .unwrap();

    // Then: A start and an end event were logged for the load
    capture.assert_event_exists("load_queries", EVENT_START);
    capture.assert_event_exists("load_queries", EVENT_END);

    let with_count = capture.count_events(|e| {
        e.op.as_deref() == Some("load_queries")
            && e.event.as_deref() == Some(EVENT_END)
            && e.fields.get("query_count").map(String::as_str) == Some("2")
    });
    assert!(with_count >= 1);
}

#[test]
fn test_failed_load_logs_error_code() {
    let capture = init_test_capture();

    let mut db = Registry::open_in_memory(None).unwrap();
    let _ = db.load_queries_str("-- :name odd_kind :pluck\nselect 1\n");

    let errors = capture.count_events(|e| {
        e.op.as_deref() == Some("load_queries")
            && e.event.as_deref() == Some(EVENT_END_ERROR)
            && e.fields.get(FIELD_ERR_CODE).map(String::as_str) == Some("ERR_UNKNOWN_KIND")
    });
    assert!(errors >= 1);
}

#[test]
fn test_verbose_registry_traces_statements() {
    // Given: A verbose registry
    let capture = init_test_capture();
    let config = RegistryConfig::memory()
        .with_schema_sql("CREATE TABLE t (a TEXT);")
        .verbose(true);
    let db = Registry::open_with(config)
        .unwrap()
        .with_queries_str("-- :name traced_insert :insert\ninsert into t (a) values (:a)\n")
        .unwrap();

    // When: A query runs
    db.insert_one("traced_insert", Record::new().with("a", "x"))
        .unwrap();

    // Then: The statement was traced with its name and SQL
    let traced = capture.count_events(|e| {
        e.fields.get("query_name").map(String::as_str) == Some("traced_insert")
            && e.fields.contains_key("sql")
    });
    assert!(traced >= 1);
}

#[test]
fn test_transaction_logs_end_error_on_rollback() {
    let capture = init_test_capture();
    let db = Registry::open_in_memory(None).unwrap();

    let _ = db.transaction(|_| Err::<(), _>(pugsql_core::RegistryError::abort("logged")));

    capture.assert_event_exists("transaction", EVENT_START);
    capture.assert_event_exists("transaction", EVENT_END_ERROR);
}
