//! Scalar SQL functions
//!
//! SQLite silently replaces a function registered twice under the same
//! name, so the registry keeps its own set of names and refuses duplicates.
//! Names compare case-insensitively, as they do in SQL text.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use pugsql_core::errors::RegistryError;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use std::collections::HashSet;
use std::panic::UnwindSafe;

/// Arity for functions that take any number of arguments
pub const VARIADIC: i32 = -1;

/// Names of the scalar functions registered on one connection
#[derive(Debug, Default)]
pub(crate) struct FunctionSet {
    names: HashSet<String>,
}

impl FunctionSet {
    pub(crate) fn register<F, T>(
        &mut self,
        conn: &Connection,
        name: &str,
        arity: i32,
        f: F,
    ) -> Result<()>
    where
        F: FnMut(&Context<'_>) -> rusqlite::Result<T> + Send + UnwindSafe + 'static,
        T: ToSql,
    {
        let key = name.to_ascii_lowercase();
        if self.names.contains(&key) {
            return Err(RegistryError::DuplicateFunction {
                name: name.to_string(),
            });
        }

        conn.create_scalar_function(name, arity, FunctionFlags::SQLITE_UTF8, f)
            .map_err(|e| from_rusqlite("register_function", e))?;

        self.names.insert(key);
        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }
}
