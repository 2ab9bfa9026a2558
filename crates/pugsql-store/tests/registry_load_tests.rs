// Loading annotated queries: atomicity, name rules, and the module cache

use pugsql_core::errors::{ErrorKind, RegistryError};
use pugsql_core::QueryKind;
use pugsql_store::Registry;
use std::path::PathBuf;

const SCHEMA: &str = "CREATE TABLE t (a TEXT, b TEXT);";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn setup() -> Registry {
    Registry::open_in_memory(Some(SCHEMA))
        .unwrap()
        .with_function("aFunction", 0, |_| Ok(42i64))
        .unwrap()
}

#[test]
fn test_load_registers_in_source_order() {
    // Given: An empty registry
    let mut db = setup();
    assert!(db.is_empty());

    // When: Queries are loaded from the fixture file
    db.load_queries(fixture("queries.sql")).unwrap();

    // Then: Every query is registered, in file order
    assert_eq!(db.len(), 11);
    let names: Vec<&str> = db.names().collect();
    assert_eq!(names[0], "runTest");
    assert_eq!(names[10], "functionTest");

    let query = db.query("getWithColumnTest").unwrap();
    assert_eq!(query.kind(), QueryKind::Get);
    assert_eq!(query.shape().column(), Some("b"));
    assert_eq!(query.sql(), "select * from t\n");
    assert_eq!(query.source_line(), 25);
}

#[test]
fn test_duplicate_name_within_one_load_registers_nothing() {
    // Given: Text declaring the same name twice
    let mut db = setup();
    let text = "-- :name a :one\nselect 1\n-- :name b :one\nselect 2\n-- :name a :one\nselect 3\n";

    // When: It is loaded
    let err = db.load_queries_str(text).unwrap_err();

    // Then: The load fails and none of its queries are callable
    assert_eq!(
        err,
        RegistryError::DuplicateQueryName {
            name: "a".to_string()
        }
    );
    assert!(db.is_empty());
    assert!(!db.contains("b"));
}

#[test]
fn test_duplicate_name_across_loads() {
    // Given: A registry that already holds query 'a'
    let mut db = setup();
    db.load_queries_str("-- :name a :one\nselect 1\n").unwrap();

    // When: A second load declares 'a' again alongside a new query
    let err = db
        .load_queries_str("-- :name c :one\nselect 3\n-- :name a :one\nselect 2\n")
        .unwrap_err();

    // Then: The second load is rejected whole and 'a' keeps its first body
    assert_eq!(err.kind(), ErrorKind::DuplicateQueryName);
    assert!(!db.contains("c"));
    assert_eq!(db.query("a").unwrap().sql(), "select 1\n");
}

#[test]
fn test_reserved_name_rejected() {
    // Given: A query named after a registry operation
    let mut db = setup();
    let text = "-- :name ok :one\nselect 1\n-- :name transaction :run\ndelete from t\n";

    // When: It is loaded
    let err = db.load_queries_str(text).unwrap_err();

    // Then: ReservedName, and the earlier valid query was not registered
    assert_eq!(
        err,
        RegistryError::ReservedName {
            name: "transaction".to_string()
        }
    );
    assert!(!db.contains("ok"));
}

#[test]
fn test_camel_case_operation_names_are_reserved() {
    let mut db = setup();
    let err = db
        .load_queries_str("-- :name loadQueries :one\nselect 1\n")
        .unwrap_err();
    assert_eq!(err.code(), "ERR_RESERVED_NAME");
}

#[test]
fn test_unknown_kind_rejected() {
    // Given: A header naming a kind outside the table
    let mut db = setup();

    // When: It is loaded
    let err = db
        .load_queries_str("-- :name fine :one\nselect 1\n-- :name q :pluck\nselect 1\n")
        .unwrap_err();

    // Then: UnknownKind naming the query and the kind
    assert_eq!(
        err,
        RegistryError::UnknownKind {
            name: "q".to_string(),
            kind: "pluck".to_string()
        }
    );
    assert!(db.is_empty());
}

#[test]
fn test_argument_on_kind_without_column_rejected() {
    let mut db = setup();
    let err = db
        .load_queries_str("-- :name q :exists(a)\nselect a from t\n")
        .unwrap_err();

    assert_eq!(
        err,
        RegistryError::InvalidArgument {
            name: "q".to_string(),
            kind: QueryKind::Exists
        }
    );
}

#[test]
fn test_prepare_failure_reports_header_line() {
    // Given: A file whose second query is not valid SQL
    let mut db = setup();

    // When: It is loaded
    let err = db.load_queries(fixture("broken.sql")).unwrap_err();

    // Then: PrepareFailed points at the offending header, nothing is registered
    match &err {
        RegistryError::PrepareFailed {
            name,
            source_line,
            cause,
            sqlite_code,
        } => {
            assert_eq!(name, "broken");
            assert_eq!(*source_line, 4);
            assert!(cause.contains("syntax error"), "cause was {}", cause);
            assert!(sqlite_code.is_some());
        }
        other => panic!("expected PrepareFailed, got {:?}", other),
    }
    assert!(!db.contains("fine"));

    // And: A failed file is not remembered as loaded
    let again = db.load_queries(fixture("broken.sql")).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::PrepareFailed);
}

#[test]
fn test_prepare_failure_for_missing_table() {
    let mut db = setup();
    let err = db
        .load_queries_str("-- :name q :all\nselect * from nowhere\n")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PrepareFailed);
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_multi_statement_body_rejected() {
    // Given: A query whose body holds two inserts
    let mut db = setup();
    let text = "-- :name ok :one\nselect 1\n\n-- :name twoRows :run\ninsert into t (a, b) values ('x', 'y');\ninsert into t (a, b) values ('p', 'q');\n";

    // When: It is loaded
    let err = db.load_queries_str(text).unwrap_err();

    // Then: PrepareFailed at its header, and nothing from the load is callable
    match &err {
        RegistryError::PrepareFailed {
            name,
            source_line,
            cause,
            ..
        } => {
            assert_eq!(name, "twoRows");
            assert_eq!(*source_line, 4);
            assert!(cause.contains("more than one statement"), "cause was {}", cause);
        }
        other => panic!("expected PrepareFailed, got {:?}", other),
    }
    assert!(db.is_empty());
}

#[test]
fn test_trailing_semicolon_and_comment_are_one_statement() {
    let mut db = setup();
    db.load_queries_str("-- :name q :one\nselect 1; -- the answer\n")
        .unwrap();
    assert!(db.contains("q"));
}

#[test]
fn test_comment_only_body_rejected() {
    // Given: A body made only of SQL comments
    let mut db = setup();

    // When: It is loaded
    let err = db
        .load_queries_str("-- :name c :one\n-- just a comment\n")
        .unwrap_err();

    // Then: The load fails instead of the first call
    assert_eq!(err.kind(), ErrorKind::PrepareFailed);
    assert_eq!(err.query_name(), Some("c"));
    assert!(err.to_string().contains("no statements"));
    assert!(!db.contains("c"));
}

#[test]
fn test_same_file_loaded_once() {
    // Given: A registry that loaded the fixture file
    let mut db = setup();
    db.load_queries(fixture("queries.sql")).unwrap();

    // When: The same file is loaded again, also through a non-canonical path
    db.load_queries(fixture("queries.sql")).unwrap();
    db.load_queries(fixture("../fixtures/queries.sql")).unwrap();

    // Then: The second and third loads are no-ops rather than duplicate errors
    assert_eq!(db.len(), 11);
}

#[test]
fn test_same_text_loaded_twice_is_a_duplicate() {
    let mut db = setup();
    let text = "-- :name a :one\nselect 1\n";
    db.load_queries_str(text).unwrap();

    let err = db.load_queries_str(text).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateQueryName);
}

#[test]
fn test_missing_file_is_io_error() {
    let mut db = setup();
    let err = db.load_queries(fixture("absent.sql")).unwrap_err();

    assert_eq!(err.code(), "ERR_IO");
    assert!(db.is_empty());
}

#[test]
fn test_structural_parse_error_surfaces() {
    let mut db = setup();
    let err = db
        .load_queries_str("select 1\n-- :name a :one\nselect 2\n")
        .unwrap_err();

    assert!(matches!(err, RegistryError::ParseStructure { line: 1, .. }));
    assert!(err.kind().is_authoring());
}

#[test]
fn test_chained_loads() {
    // Given/When: Queries loaded in two chained steps
    let mut db = setup();
    db.load_queries_str("-- :name a :one\nselect 1\n")
        .unwrap()
        .load_queries_str("-- :name b :one\nselect 2\n")
        .unwrap();

    // Then: Both are present in load order
    assert_eq!(db.names().collect::<Vec<_>>(), vec!["a", "b"]);
}
