//! Registry configuration
//!
//! Only what a caller may choose: where the database lives, an optional
//! schema to run at open, and verbose statement tracing. Connection pragmas
//! are fixed and not part of the configuration.

use pugsql_core::errors::RegistryError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::Result;

/// Location string that selects an in-memory database
pub const MEMORY_LOCATION: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Database file path, or `:memory:`
    pub location: PathBuf,
    /// Schema file executed once at open
    pub schema_path: Option<PathBuf>,
    /// Schema SQL executed once at open, after `schema_path`
    pub schema_sql: Option<String>,
    /// Log every executed statement at debug level
    pub verbose: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from(MEMORY_LOCATION),
            schema_path: None,
            schema_sql: None,
            verbose: false,
        }
    }
}

impl RegistryConfig {
    pub fn new(location: impl AsRef<Path>) -> Self {
        Self {
            location: location.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn with_schema_path(mut self, path: impl AsRef<Path>) -> Self {
        self.schema_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_schema_sql(mut self, sql: impl Into<String>) -> Self {
        self.schema_sql = Some(sql.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.location.as_os_str() == MEMORY_LOCATION
    }

    /// Parse a TOML table such as
    ///
    /// ```toml
    /// location = "app.db"
    /// schema_path = "schema.sql"
    /// verbose = true
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RegistryError::InvalidConfig {
            reason: e.to_string(),
        })
    }
}
