//! Database connection management
//!
//! Every registry connection runs with the same fixed policy: foreign keys
//! enforced and write-ahead logging. In-memory databases cannot use WAL and
//! report `memory` instead.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(|e| from_rusqlite("open", e))
}

/// Open an in-memory SQLite database
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(|e| from_rusqlite("open", e))
}

/// Apply the fixed connection policy
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| from_rusqlite("pragma foreign_keys", e))?;

    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .map_err(|e| from_rusqlite("pragma journal_mode", e))?;

    debug!(journal_mode = %journal_mode(conn)?, "connection configured");
    Ok(())
}

/// Current journal mode, lower-cased (`wal`, `memory`, ...)
pub fn journal_mode(conn: &Connection) -> Result<String> {
    conn.query_row("PRAGMA journal_mode;", [], |row| row.get::<_, String>(0))
        .map(|mode| mode.to_lowercase())
        .map_err(|e| from_rusqlite("pragma journal_mode", e))
}

/// Whether foreign key enforcement is on
pub fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    conn.query_row("PRAGMA foreign_keys;", [], |row| row.get::<_, i64>(0))
        .map(|flag| flag == 1)
        .map_err(|e| from_rusqlite("pragma foreign_keys", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_database_uses_wal() {
        let dir = TempDir::new().unwrap();
        let conn = open(dir.path().join("test.db")).unwrap();
        configure(&conn).unwrap();

        assert_eq!(journal_mode(&conn).unwrap(), "wal");
        assert!(foreign_keys_enabled(&conn).unwrap());
    }

    #[test]
    fn test_memory_database_keeps_memory_journal() {
        let conn = open_in_memory().unwrap();
        configure(&conn).unwrap();

        assert_eq!(journal_mode(&conn).unwrap(), "memory");
        assert!(foreign_keys_enabled(&conn).unwrap());
    }
}
