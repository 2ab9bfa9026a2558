//! Compiled queries and their execution
//!
//! A [`Query`] is a spec that passed the kind table and the statement
//! preparer. Executing it fetches the statement from the connection's
//! statement cache, binds the call's parameters, and shapes the result
//! according to the query's kind.

#![allow(clippy::result_large_err)]

use crate::value::{Params, Record};
use pugsql_core::kind::{QueryKind, QueryShape};
use pugsql_core::parser::QuerySpec;
use rusqlite::types::Value;
use rusqlite::{Connection, Statement};
use serde::Serialize;

/// Outcome of a raw execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub changes: u64,
    pub last_insert_rowid: i64,
}

/// Result of calling a query, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Run(RunResult),
    Changes(u64),
    LastRowId(i64),
    Row(Option<Record>),
    Rows(Vec<Record>),
    Value(Option<Value>),
    Values(Vec<Value>),
    Exists(bool),
    InsertId(i64),
}

/// Which value a plucking read returns from each row
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pluck<'a> {
    First,
    Column(&'a str),
}

impl Pluck<'_> {
    fn read(self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
        match self {
            Pluck::First => row.get(0),
            Pluck::Column(name) => row.get(name),
        }
    }
}

/// A named query compiled against one connection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    name: String,
    sql: String,
    source_line: usize,
    shape: QueryShape,
}

impl Query {
    pub(crate) fn new(spec: QuerySpec, shape: QueryShape) -> Self {
        Self {
            name: spec.name,
            sql: spec.sql,
            source_line: spec.source_line,
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn source_line(&self) -> usize {
        self.source_line
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    pub fn kind(&self) -> QueryKind {
        self.shape.kind()
    }

    /// Run the query with the result shape its kind prescribes
    pub(crate) fn execute(&self, conn: &Connection, params: &Params) -> rusqlite::Result<QueryOutput> {
        Ok(match &self.shape {
            QueryShape::Run => QueryOutput::Run(self.execute_write(conn, params)?),
            QueryShape::Changes => QueryOutput::Changes(self.execute_write(conn, params)?.changes),
            QueryShape::LastRowId => {
                QueryOutput::LastRowId(self.execute_write(conn, params)?.last_insert_rowid)
            }
            QueryShape::Insert => {
                QueryOutput::InsertId(self.execute_write(conn, params)?.last_insert_rowid)
            }
            QueryShape::Get { column: None } => QueryOutput::Row(self.fetch_first(conn, params)?),
            QueryShape::Get {
                column: Some(column),
            } => QueryOutput::Value(self.pluck_first(conn, params, Pluck::Column(column))?),
            QueryShape::All { column: None } => QueryOutput::Rows(self.fetch_all(conn, params)?),
            QueryShape::All {
                column: Some(column),
            } => QueryOutput::Values(self.pluck_all(conn, params, Pluck::Column(column))?),
            QueryShape::One => QueryOutput::Value(self.pluck_first(conn, params, Pluck::First)?),
            QueryShape::List => QueryOutput::Values(self.pluck_all(conn, params, Pluck::First)?),
            QueryShape::Exists => QueryOutput::Exists(self.exists(conn, params)?),
        })
    }

    /// Step the statement to completion
    pub(crate) fn execute_write(
        &self,
        conn: &Connection,
        params: &Params,
    ) -> rusqlite::Result<RunResult> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let changes = stmt.raw_execute()?;
        Ok(RunResult {
            changes: changes as u64,
            last_insert_rowid: conn.last_insert_rowid(),
        })
    }

    pub(crate) fn fetch_first(
        &self,
        conn: &Connection,
        params: &Params,
    ) -> rusqlite::Result<Option<Record>> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.raw_query();
        match rows.next()? {
            Some(row) => Ok(Some(Record::from_row(row, &columns)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn fetch_all(
        &self,
        conn: &Connection,
        params: &Params,
    ) -> rusqlite::Result<Vec<Record>> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.raw_query();
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Record::from_row(row, &columns)?);
        }
        Ok(records)
    }

    pub(crate) fn pluck_first(
        &self,
        conn: &Connection,
        params: &Params,
        pluck: Pluck<'_>,
    ) -> rusqlite::Result<Option<Value>> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let mut rows = stmt.raw_query();
        match rows.next()? {
            Some(row) => Ok(Some(pluck.read(row)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn pluck_all(
        &self,
        conn: &Connection,
        params: &Params,
        pluck: Pluck<'_>,
    ) -> rusqlite::Result<Vec<Value>> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let mut rows = stmt.raw_query();
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(pluck.read(row)?);
        }
        Ok(values)
    }

    pub(crate) fn exists(&self, conn: &Connection, params: &Params) -> rusqlite::Result<bool> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        bind(&mut stmt, params)?;
        let mut rows = stmt.raw_query();
        Ok(rows.next()?.is_some())
    }
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

/// Bind one call's parameters to a fresh (reset, cleared) statement
fn bind(stmt: &mut Statement<'_>, params: &Params) -> rusqlite::Result<()> {
    let expected = stmt.parameter_count();
    match params {
        Params::None => {
            if expected != 0 {
                return Err(rusqlite::Error::InvalidParameterCount(0, expected));
            }
        }
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(rusqlite::Error::InvalidParameterCount(
                    values.len(),
                    expected,
                ));
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)?;
            }
        }
        Params::Named(record) => {
            for idx in 1..=expected {
                let placeholder = stmt
                    .parameter_name(idx)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("?{}", idx));
                let key = placeholder.trim_start_matches([':', '$', '@']);
                let value = record
                    .get(key)
                    .ok_or_else(|| rusqlite::Error::InvalidParameterName(placeholder.clone()))?;
                stmt.raw_bind_parameter(idx, value)?;
            }
        }
    }
    Ok(())
}
