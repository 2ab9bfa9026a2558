//! PugSQL Core - annotation parsing, kind table, and shared facilities
//!
//! This crate provides the engine-independent half of the query registry:
//! - Annotation parser turning `-- :name x :kind` blocks into query specs
//! - The closed kind table and spec compilation
//! - Error taxonomy with stable codes
//! - Structured logging facility

pub mod errors;
pub mod kind;
pub mod logging_facility;
pub mod parser;

pub use pugsql_core_types::schema;

// Re-export commonly used types
pub use errors::{ErrorKind, RegistryError, Result};
pub use kind::{QueryKind, QueryShape};
pub use parser::QuerySpec;
