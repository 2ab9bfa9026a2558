//! Error handling for pugsql-store
//!
//! Wraps RegistryError with rusqlite-specific helpers

use pugsql_core::errors::RegistryError;
use pugsql_core::parser::QuerySpec;

/// Result type alias using RegistryError
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Extended SQLite result code carried by an engine error
pub fn sqlite_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        rusqlite::Error::SqlInputError { error, .. } => Some(error.extended_code),
        _ => None,
    }
}

/// Create a connection-level error from rusqlite::Error
pub fn from_rusqlite(op: &str, err: rusqlite::Error) -> RegistryError {
    RegistryError::Persistence {
        op: op.to_string(),
        cause: err.to_string(),
    }
}

/// Create a call-time error for a named query
pub fn query_failed(name: &str, err: rusqlite::Error) -> RegistryError {
    RegistryError::QueryExecution {
        name: name.to_string(),
        sqlite_code: sqlite_code(&err),
        cause: err.to_string(),
    }
}

/// Create a load-time error for a statement SQLite would not prepare
pub fn prepare_failed(spec: &QuerySpec, err: rusqlite::Error) -> RegistryError {
    RegistryError::PrepareFailed {
        name: spec.name.clone(),
        source_line: spec.source_line,
        sqlite_code: sqlite_code(&err),
        cause: err.to_string(),
    }
}

/// Create a load-time error for a body that prepares but is not exactly one
/// statement
pub fn invalid_body(spec: &QuerySpec, reason: &str) -> RegistryError {
    RegistryError::PrepareFailed {
        name: spec.name.clone(),
        source_line: spec.source_line,
        sqlite_code: None,
        cause: reason.to_string(),
    }
}

/// Create an IO error
pub fn io_error(op: &str, err: std::io::Error) -> RegistryError {
    RegistryError::Io {
        op: op.to_string(),
        cause: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_prepare_error_keeps_sqlite_code() {
        // Given: SQL the engine rejects while preparing
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.prepare("selec 1").map(|_| ()).unwrap_err();

        // Then: The primary code is SQLITE_ERROR, whichever variant carried it
        assert_eq!(sqlite_code(&err).map(|c| c & 0xff), Some(1));
    }

    #[test]
    fn test_non_engine_error_has_no_code() {
        assert_eq!(sqlite_code(&rusqlite::Error::InvalidQuery), None);
    }
}
