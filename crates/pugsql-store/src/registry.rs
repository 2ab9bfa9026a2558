//! Query registry
//!
//! A [`Registry`] owns one SQLite connection and the named queries compiled
//! against it. Queries are loaded from annotated SQL, checked in full before
//! any of them becomes callable, and then invoked by name.
//!
//! Transactions flatten: a `transaction` or `insert_many` started while
//! another unit is open joins it. If a joined unit fails, the outermost unit
//! is marked rollback-only and rolls back when it finishes, even if the
//! caller swallowed the inner error.

#![allow(clippy::result_large_err)]

use crate::config::RegistryConfig;
use crate::db;
use crate::errors::{
    from_rusqlite, invalid_body, io_error, prepare_failed, query_failed, Result,
};
use crate::functions::FunctionSet;
use crate::query::{Pluck, Query, QueryOutput, RunResult};
use crate::value::{Params, Record};
use pugsql_core::errors::RegistryError;
use pugsql_core::kind::{self, QueryShape};
use pugsql_core::parser::{self, QuerySpec};
use pugsql_core::{log_op_end, log_op_error, log_op_start};
use rusqlite::functions::Context;
use rusqlite::types::{ToSql, Value};
use rusqlite::{Batch, Connection, Transaction};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::panic::UnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// Names a query may not take: every registry operation, in both the Rust
/// spelling and the camelCase spelling annotation files were written for.
pub const RESERVED_NAMES: &[&str] = &[
    "open",
    "open_in_memory",
    "open_with",
    "register_function",
    "with_function",
    "has_function",
    "load_queries",
    "load_queries_str",
    "with_queries",
    "with_queries_str",
    "call",
    "run",
    "changes",
    "last_row_id",
    "get",
    "get_value",
    "all",
    "all_values",
    "one",
    "list",
    "exists",
    "insert_one",
    "insert_many",
    "transaction",
    "query",
    "names",
    "contains",
    "len",
    "is_empty",
    "close",
    "dbFunction",
    "module",
    "addFunction",
    "addQueries",
    "loadQueries",
    "registerFunction",
    "insertOne",
    "insertMany",
    "lastRowId",
];

const MIN_STATEMENT_CACHE: usize = 16;

/// Tracks how deep inside atomic units the registry currently is.
struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Named queries bound to one exclusively owned connection
///
/// Not `Sync`: share it across threads behind a mutex, or open one
/// registry per thread.
#[derive(Debug)]
pub struct Registry {
    conn: Connection,
    queries: HashMap<String, Query>,
    order: Vec<String>,
    functions: FunctionSet,
    modules: HashSet<PathBuf>,
    verbose: bool,
    depth: Cell<u32>,
    rollback_only: Cell<bool>,
}

impl Registry {
    // ===== Opening =====

    /// Open a database file, running `schema` once if given
    pub fn open<P: AsRef<Path>>(location: P, schema: Option<&str>) -> Result<Self> {
        let mut config = RegistryConfig::new(location);
        config.schema_sql = schema.map(str::to_string);
        Self::open_with(config)
    }

    /// Open a private in-memory database, running `schema` once if given
    pub fn open_in_memory(schema: Option<&str>) -> Result<Self> {
        let mut config = RegistryConfig::memory();
        config.schema_sql = schema.map(str::to_string);
        Self::open_with(config)
    }

    pub fn open_with(config: RegistryConfig) -> Result<Self> {
        log_op_start!("open", location = %config.location.display());
        let started = Instant::now();
        let result = Self::connect(&config);
        finish_op("open", started, result)
    }

    fn connect(config: &RegistryConfig) -> Result<Self> {
        let conn = if config.is_memory() {
            db::open_in_memory()?
        } else {
            db::open(&config.location)?
        };
        db::configure(&conn)?;

        if let Some(path) = &config.schema_path {
            let sql = fs::read_to_string(path)
                .map_err(|e| io_error(&format!("read {}", path.display()), e))?;
            conn.execute_batch(&sql)
                .map_err(|e| from_rusqlite("schema", e))?;
        }
        if let Some(sql) = &config.schema_sql {
            conn.execute_batch(sql)
                .map_err(|e| from_rusqlite("schema", e))?;
        }

        Ok(Self {
            conn,
            queries: HashMap::new(),
            order: Vec::new(),
            functions: FunctionSet::default(),
            modules: HashSet::new(),
            verbose: config.verbose,
            depth: Cell::new(0),
            rollback_only: Cell::new(false),
        })
    }

    /// Close the connection, finalizing every cached statement
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| from_rusqlite("close", e))
    }

    // ===== Scalar functions =====

    /// Make `f` callable from SQL as `name(...)`
    ///
    /// `arity` is the argument count, or [`crate::functions::VARIADIC`].
    pub fn register_function<F, T>(&mut self, name: &str, arity: i32, f: F) -> Result<&mut Self>
    where
        F: FnMut(&Context<'_>) -> rusqlite::Result<T> + Send + UnwindSafe + 'static,
        T: ToSql,
    {
        log_op_start!("register_function", function_name = name, arity = arity);
        let started = Instant::now();
        let result = self.functions.register(&self.conn, name, arity, f);
        finish_op("register_function", started, result)?;
        Ok(self)
    }

    /// By-value form of [`Registry::register_function`] for building chains
    pub fn with_function<F, T>(mut self, name: &str, arity: i32, f: F) -> Result<Self>
    where
        F: FnMut(&Context<'_>) -> rusqlite::Result<T> + Send + UnwindSafe + 'static,
        T: ToSql,
    {
        self.register_function(name, arity, f)?;
        Ok(self)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    // ===== Loading =====

    /// Load annotated queries from a file
    ///
    /// Files are remembered by canonical path; loading one again is a no-op.
    pub fn load_queries<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path)
            .map_err(|e| io_error(&format!("read {}", path.display()), e))?;

        if self.modules.contains(&canonical) {
            debug!(source = %path.display(), "queries already loaded");
            return Ok(self);
        }

        self.load(&path.display().to_string(), || parser::parse_file(&canonical))?;
        self.modules.insert(canonical);
        Ok(self)
    }

    /// Load annotated queries from text
    pub fn load_queries_str(&mut self, text: &str) -> Result<&mut Self> {
        self.load("<text>", || parser::parse_str(text))?;
        Ok(self)
    }

    /// By-value form of [`Registry::load_queries`]
    pub fn with_queries<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.load_queries(path)?;
        Ok(self)
    }

    /// By-value form of [`Registry::load_queries_str`]
    pub fn with_queries_str(mut self, text: &str) -> Result<Self> {
        self.load_queries_str(text)?;
        Ok(self)
    }

    fn load<F>(&mut self, source: &str, parse: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<QuerySpec>>,
    {
        log_op_start!("load_queries", source = source);
        let started = Instant::now();

        let compiled = parse().and_then(|specs| self.compile_all(specs));
        let result = match compiled {
            Ok(queries) => {
                let count = queries.len();
                for query in queries {
                    self.order.push(query.name().to_string());
                    self.queries.insert(query.name().to_string(), query);
                }
                Ok(count)
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(count) => log_op_end!(
                "load_queries",
                duration_ms = elapsed_ms(started),
                query_count = *count as u64
            ),
            Err(err) => log_op_error!("load_queries", err, duration_ms = elapsed_ms(started)),
        }
        result.map(|_| ())
    }

    /// Check and prepare every spec without touching the query table, so a
    /// failing load leaves the registry as it was.
    fn compile_all(&self, specs: Vec<QuerySpec>) -> Result<Vec<Query>> {
        self.conn.set_prepared_statement_cache_capacity(
            (self.queries.len() + specs.len()).max(MIN_STATEMENT_CACHE),
        );

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(specs.len());

        for spec in specs {
            let shape = kind::compile(&spec)?;

            if RESERVED_NAMES.contains(&spec.name.as_str()) {
                return Err(RegistryError::ReservedName { name: spec.name });
            }
            if self.queries.contains_key(&spec.name) || !seen.insert(spec.name.clone()) {
                return Err(RegistryError::DuplicateQueryName { name: spec.name });
            }

            match self.count_statements(&spec)? {
                0 => return Err(invalid_body(&spec, "body contains no statements")),
                1 => {}
                _ => return Err(invalid_body(&spec, "body contains more than one statement")),
            }
            self.conn
                .prepare_cached(&spec.sql)
                .map_err(|e| prepare_failed(&spec, e))?;

            debug!(query_name = %spec.name, query_kind = %shape, line = spec.source_line, "compiled query");
            compiled.push(Query::new(spec, shape));
        }

        Ok(compiled)
    }

    /// Statements in a body, stopping at two. Comment-only tails are not
    /// counted.
    fn count_statements(&self, spec: &QuerySpec) -> Result<usize> {
        let mut batch = Batch::new(&self.conn, &spec.sql);
        let mut count = 0;
        while count < 2 && batch.next().map_err(|e| prepare_failed(spec, e))?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    // ===== Introspection =====

    pub fn query(&self, name: &str) -> Option<&Query> {
        self.queries.get(name)
    }

    /// Query names in load order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    // ===== Calling =====

    /// Call a query by name; the output variant follows the query's kind.
    /// An `insert` query called this way inserts a single row.
    pub fn call(&self, name: &str, params: impl Into<Params>) -> Result<QueryOutput> {
        let query = self.lookup(name)?;
        self.invoke(query, params.into(), |q, conn, p| q.execute(conn, p))
    }

    pub fn run(&self, name: &str, params: impl Into<Params>) -> Result<RunResult> {
        let query = self.typed(name, "run", |s| matches!(s, QueryShape::Run))?;
        self.invoke(query, params.into(), Query::execute_write)
    }

    /// Number of rows changed
    pub fn changes(&self, name: &str, params: impl Into<Params>) -> Result<u64> {
        let query = self.typed(name, "changes", |s| matches!(s, QueryShape::Changes))?;
        self.invoke(query, params.into(), Query::execute_write)
            .map(|run| run.changes)
    }

    pub fn last_row_id(&self, name: &str, params: impl Into<Params>) -> Result<i64> {
        let query = self.typed(name, "lastRowID", |s| matches!(s, QueryShape::LastRowId))?;
        self.invoke(query, params.into(), Query::execute_write)
            .map(|run| run.last_insert_rowid)
    }

    /// First row; `None` when nothing matched
    pub fn get(&self, name: &str, params: impl Into<Params>) -> Result<Option<Record>> {
        let query = self.typed(name, "get", |s| {
            matches!(s, QueryShape::Get { column: None })
        })?;
        self.invoke(query, params.into(), Query::fetch_first)
    }

    /// The `:get(<column>)` column of the first row
    pub fn get_value(&self, name: &str, params: impl Into<Params>) -> Result<Option<Value>> {
        let query = self.typed(name, "get(<column>)", |s| {
            matches!(s, QueryShape::Get { column: Some(_) })
        })?;
        self.invoke(query, params.into(), |q, conn, p| {
            q.pluck_first(conn, p, selected(q))
        })
    }

    pub fn all(&self, name: &str, params: impl Into<Params>) -> Result<Vec<Record>> {
        let query = self.typed(name, "all", |s| {
            matches!(s, QueryShape::All { column: None })
        })?;
        self.invoke(query, params.into(), Query::fetch_all)
    }

    /// The `:all(<column>)` column of every row
    pub fn all_values(&self, name: &str, params: impl Into<Params>) -> Result<Vec<Value>> {
        let query = self.typed(name, "all(<column>)", |s| {
            matches!(s, QueryShape::All { column: Some(_) })
        })?;
        self.invoke(query, params.into(), |q, conn, p| {
            q.pluck_all(conn, p, selected(q))
        })
    }

    /// First column of the first row
    pub fn one(&self, name: &str, params: impl Into<Params>) -> Result<Option<Value>> {
        let query = self.typed(name, "one", |s| matches!(s, QueryShape::One))?;
        self.invoke(query, params.into(), |q, conn, p| {
            q.pluck_first(conn, p, Pluck::First)
        })
    }

    /// First column of every row
    pub fn list(&self, name: &str, params: impl Into<Params>) -> Result<Vec<Value>> {
        let query = self.typed(name, "list", |s| matches!(s, QueryShape::List))?;
        self.invoke(query, params.into(), |q, conn, p| {
            q.pluck_all(conn, p, Pluck::First)
        })
    }

    pub fn exists(&self, name: &str, params: impl Into<Params>) -> Result<bool> {
        let query = self.typed(name, "exists", |s| matches!(s, QueryShape::Exists))?;
        self.invoke(query, params.into(), Query::exists)
    }

    // ===== Inserting =====

    /// Insert one record, returning its rowid
    pub fn insert_one(&self, name: &str, record: Record) -> Result<i64> {
        let query = self.typed(name, "insert", |s| matches!(s, QueryShape::Insert))?;
        self.invoke(query, Params::Named(record), Query::execute_write)
            .map(|run| run.last_insert_rowid)
    }

    /// Insert every record as one atomic unit, returning the rowid of the
    /// last one (`None` for an empty batch). If any insert fails, none of
    /// the batch is kept and that failure is returned.
    pub fn insert_many<I>(&self, name: &str, records: I) -> Result<Option<i64>>
    where
        I: IntoIterator<Item = Record>,
    {
        let query = self.typed(name, "insert", |s| matches!(s, QueryShape::Insert))?;

        log_op_start!("insert_many", query_name = name);
        let started = Instant::now();

        let result = self.atomically(|| {
            let mut last = None;
            let mut count = 0u64;
            for record in records {
                let run = self.invoke(query, Params::Named(record), Query::execute_write)?;
                last = Some(run.last_insert_rowid);
                count += 1;
            }
            Ok((last, count))
        });

        match &result {
            Ok((_, count)) => log_op_end!(
                "insert_many",
                duration_ms = elapsed_ms(started),
                batch_len = *count
            ),
            Err(err) => log_op_error!("insert_many", err, duration_ms = elapsed_ms(started)),
        }
        result.map(|(last, _)| last)
    }

    // ===== Transactions =====

    /// Run `f` as one atomic unit
    ///
    /// Commits when `f` returns `Ok`; otherwise rolls back every mutation
    /// made inside it and returns `TransactionAborted`. Nested calls join
    /// the enclosing unit (see the module docs).
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        log_op_start!("transaction", nested = self.depth.get() > 0);
        let started = Instant::now();

        let result = self.atomically(|| f(self)).map_err(|err| match err {
            RegistryError::TransactionAborted { .. } => err,
            other => RegistryError::TransactionAborted {
                source: Box::new(other),
            },
        });

        finish_op("transaction", started, result)
    }

    fn atomically<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.depth.get() > 0 {
            let _depth = DepthGuard::enter(&self.depth);
            return body().map_err(|err| {
                self.rollback_only.set(true);
                err
            });
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| from_rusqlite("begin", e))?;
        self.rollback_only.set(false);

        let outcome = {
            let _depth = DepthGuard::enter(&self.depth);
            body()
        };

        match outcome {
            Ok(value) if !self.rollback_only.replace(false) => {
                tx.commit().map_err(|e| from_rusqlite("commit", e))?;
                Ok(value)
            }
            Ok(_) => {
                rollback(tx);
                Err(RegistryError::RollbackOnly)
            }
            Err(err) => {
                self.rollback_only.set(false);
                rollback(tx);
                Err(err)
            }
        }
    }

    // ===== Internals =====

    fn lookup(&self, name: &str) -> Result<&Query> {
        self.queries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownQuery {
                name: name.to_string(),
            })
    }

    /// Look up a query and check its shape before anything executes
    fn typed<A>(&self, name: &str, expected: &'static str, accept: A) -> Result<&Query>
    where
        A: Fn(&QueryShape) -> bool,
    {
        let query = self.lookup(name)?;
        if !accept(query.shape()) {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected,
                actual: query.shape().to_string(),
            });
        }
        Ok(query)
    }

    fn invoke<T, F>(&self, query: &Query, params: Params, exec: F) -> Result<T>
    where
        F: FnOnce(&Query, &Connection, &Params) -> rusqlite::Result<T>,
    {
        if self.verbose {
            debug!(
                query_name = query.name(),
                query_kind = %query.shape(),
                sql = query.sql().trim_end(),
                params = ?params,
                "executing query"
            );
        }
        exec(query, &self.conn, &params).map_err(|e| query_failed(query.name(), e))
    }
}

fn selected(query: &Query) -> Pluck<'_> {
    query
        .shape()
        .column()
        .map(Pluck::Column)
        .unwrap_or(Pluck::First)
}

fn rollback(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        warn!(error = %e, "rollback failed");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn finish_op<T>(op: &'static str, started: Instant, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => log_op_end!(op, duration_ms = elapsed_ms(started)),
        Err(err) => log_op_error!(op, err, duration_ms = elapsed_ms(started)),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names_cover_operations() {
        for name in ["transaction", "load_queries", "register_function", "close"] {
            assert!(RESERVED_NAMES.contains(&name), "{} should be reserved", name);
        }
        assert!(RESERVED_NAMES.contains(&"loadQueries"));
    }

    #[test]
    fn test_depth_guard_restores_on_drop() {
        let depth = Cell::new(0);
        {
            let _outer = DepthGuard::enter(&depth);
            let _inner = DepthGuard::enter(&depth);
            assert_eq!(depth.get(), 2);
        }
        assert_eq!(depth.get(), 0);
    }

    #[test]
    fn test_kind_mismatch_checked_before_execution() {
        let registry = Registry::open_in_memory(Some("CREATE TABLE t (a TEXT);"))
            .unwrap()
            .with_queries_str("-- :name addT :insert\ninsert into t (a) values ($a)\n")
            .unwrap();

        let err = registry.exists("addT", Record::new().with("a", "x")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::KindMismatch {
                name: "addT".to_string(),
                expected: "exists",
                actual: "insert".to_string(),
            }
        );

        // Nothing was inserted by the rejected call
        let count: i64 = registry
            .conn
            .query_row("select count(*) from t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_statement_cache_grows_with_queries() {
        let mut registry = Registry::open_in_memory(None).unwrap();
        let text: String = (0..40)
            .map(|i| format!("-- :name q{} :one\nselect {}\n", i, i))
            .collect();
        registry.load_queries_str(&text).unwrap();

        assert_eq!(registry.len(), 40);
        assert_eq!(registry.one("q39", ()).unwrap(), Some(Value::Integer(39)));
        assert_eq!(registry.one("q0", ()).unwrap(), Some(Value::Integer(0)));
    }
}
