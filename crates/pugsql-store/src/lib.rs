//! PugSQL Store - the SQLite-backed query registry
//!
//! Opens a connection, loads annotated SQL through `pugsql-core`, and
//! exposes each loaded query as a named, typed call:
//!
//! ```
//! use pugsql_store::{Record, Registry};
//!
//! let mut registry = Registry::open_in_memory(Some("CREATE TABLE t (a TEXT, b TEXT);"))?;
//! registry.load_queries_str(
//!     "-- :name addT :insert\n\
//!      insert into t (a, b) values ($a, $b)\n\
//!      -- :name getB :get(b)\n\
//!      select * from t where a = ?\n",
//! )?;
//!
//! registry.insert_one("addT", Record::new().with("a", "x").with("b", "y"))?;
//! let b = registry.get_value("getB", pugsql_store::Params::positional(["x"]))?;
//! assert_eq!(b, Some(pugsql_store::Value::Text("y".to_string())));
//! # Ok::<(), pugsql_core::RegistryError>(())
//! ```

pub mod config;
pub mod db;
pub mod errors;
pub mod functions;
pub mod query;
pub mod registry;
pub mod value;

pub use config::RegistryConfig;
pub use functions::VARIADIC;
pub use query::{Query, QueryOutput, RunResult};
pub use registry::{Registry, RESERVED_NAMES};
pub use rusqlite::functions::Context as FunctionContext;
pub use rusqlite::types::Value;
pub use value::{IntoValue, Params, Record};
