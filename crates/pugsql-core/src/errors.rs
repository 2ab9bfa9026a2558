use crate::kind::QueryKind;
use thiserror::Error;

/// Result type alias using RegistryError
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Primary result code SQLite uses for every constraint failure
/// (`SQLITE_CONSTRAINT`); extended codes keep it in the low byte.
const SQLITE_CONSTRAINT: i32 = 19;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling and in tests, independent of the message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Authoring (load time)
    ParseStructure,
    UnknownKind,
    InvalidArgument,
    ReservedName,
    DuplicateQueryName,
    PrepareFailed,
    DuplicateFunction,

    // Call time
    NotFound,
    KindMismatch,
    QueryExecution,

    // Transactions
    TransactionAborted,
    Aborted,

    // Integration/IO
    Persistence,
    Io,
    InvalidConfig,
}

impl ErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ParseStructure => "ERR_PARSE_STRUCTURE",
            ErrorKind::UnknownKind => "ERR_UNKNOWN_KIND",
            ErrorKind::InvalidArgument => "ERR_INVALID_ARGUMENT",
            ErrorKind::ReservedName => "ERR_RESERVED_NAME",
            ErrorKind::DuplicateQueryName => "ERR_DUPLICATE_QUERY_NAME",
            ErrorKind::PrepareFailed => "ERR_PREPARE_FAILED",
            ErrorKind::DuplicateFunction => "ERR_DUPLICATE_FUNCTION",
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::KindMismatch => "ERR_KIND_MISMATCH",
            ErrorKind::QueryExecution => "ERR_QUERY_EXECUTION",
            ErrorKind::TransactionAborted => "ERR_TRANSACTION_ABORTED",
            ErrorKind::Aborted => "ERR_ABORTED",
            ErrorKind::Persistence => "ERR_PERSISTENCE",
            ErrorKind::Io => "ERR_IO",
            ErrorKind::InvalidConfig => "ERR_INVALID_CONFIG",
        }
    }

    /// Whether this kind is raised while loading queries rather than while
    /// executing them. Authoring errors abort the whole load.
    pub fn is_authoring(&self) -> bool {
        matches!(
            self,
            ErrorKind::ParseStructure
                | ErrorKind::UnknownKind
                | ErrorKind::InvalidArgument
                | ErrorKind::ReservedName
                | ErrorKind::DuplicateQueryName
                | ErrorKind::PrepareFailed
                | ErrorKind::DuplicateFunction
        )
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for registry operations
///
/// Engine failures are carried as rendered strings plus the SQLite extended
/// result code, which keeps the type `Clone + PartialEq` for assertions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    // ===== Authoring Errors =====
    /// Annotation text is structurally malformed
    #[error("Malformed query annotations at line {line}: {reason}")]
    ParseStructure { line: usize, reason: String },

    /// A query names a kind that is not in the kind table
    #[error("Unknown kind of query for '{name}': {kind}")]
    UnknownKind { name: String, kind: String },

    /// A query passes an argument to a kind that takes none
    #[error("Query '{name}' of kind '{kind}' does not take an argument")]
    InvalidArgument { name: String, kind: QueryKind },

    /// A query name collides with a registry operation
    #[error("Query name '{name}' is reserved by the registry")]
    ReservedName { name: String },

    /// A query name collides with an already registered query
    #[error("Query name '{name}' is already registered")]
    DuplicateQueryName { name: String },

    /// SQLite rejected the statement while preparing it, or the body is not
    /// exactly one statement
    #[error("Failed to prepare query '{name}' (line {source_line}): {cause}")]
    PrepareFailed {
        name: String,
        source_line: usize,
        cause: String,
        sqlite_code: Option<i32>,
    },

    /// A scalar function of the same name is already registered
    #[error("SQL function '{name}' is already registered")]
    DuplicateFunction { name: String },

    // ===== Call Errors =====
    /// No query is registered under the requested name
    #[error("No query named '{name}'")]
    UnknownQuery { name: String },

    /// A typed accessor was used on a query whose kind returns a
    /// different shape; `actual` is the query's kind as written, e.g. `get(b)`
    #[error("Query '{name}' is declared ':{actual}', not ':{expected}'")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// The statement failed while executing
    #[error("Query '{name}' failed: {cause}")]
    QueryExecution {
        name: String,
        cause: String,
        sqlite_code: Option<i32>,
    },

    // ===== Transaction Errors =====
    /// The body of a transaction failed and every mutation was rolled back
    #[error("Transaction aborted: {source}")]
    TransactionAborted { source: Box<RegistryError> },

    /// A nested unit failed, so the enclosing transaction was rolled back
    /// even though its own body succeeded
    #[error("Transaction marked rollback-only by a failed nested unit")]
    RollbackOnly,

    /// Raised by caller code to abandon a transaction
    #[error("Aborted: {reason}")]
    Aborted { reason: String },

    // ===== Integration Errors =====
    /// Connection-level failure (open, pragma, schema, commit)
    #[error("Database error in '{op}': {cause}")]
    Persistence { op: String, cause: String },

    /// Reading an annotation or schema file failed
    #[error("IO error in '{op}': {cause}")]
    Io { op: String, cause: String },

    /// Registry configuration could not be read
    #[error("Invalid registry configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl RegistryError {
    /// Abort the surrounding transaction with a caller-supplied reason
    pub fn abort(reason: impl Into<String>) -> Self {
        RegistryError::Aborted {
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::ParseStructure { .. } => ErrorKind::ParseStructure,
            RegistryError::UnknownKind { .. } => ErrorKind::UnknownKind,
            RegistryError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            RegistryError::ReservedName { .. } => ErrorKind::ReservedName,
            RegistryError::DuplicateQueryName { .. } => ErrorKind::DuplicateQueryName,
            RegistryError::PrepareFailed { .. } => ErrorKind::PrepareFailed,
            RegistryError::DuplicateFunction { .. } => ErrorKind::DuplicateFunction,
            RegistryError::UnknownQuery { .. } => ErrorKind::NotFound,
            RegistryError::KindMismatch { .. } => ErrorKind::KindMismatch,
            RegistryError::QueryExecution { .. } => ErrorKind::QueryExecution,
            RegistryError::TransactionAborted { .. } | RegistryError::RollbackOnly => {
                ErrorKind::TransactionAborted
            }
            RegistryError::Aborted { .. } => ErrorKind::Aborted,
            RegistryError::Persistence { .. } => ErrorKind::Persistence,
            RegistryError::Io { .. } => ErrorKind::Io,
            RegistryError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The query this error concerns, if any
    pub fn query_name(&self) -> Option<&str> {
        match self {
            RegistryError::UnknownKind { name, .. }
            | RegistryError::InvalidArgument { name, .. }
            | RegistryError::ReservedName { name }
            | RegistryError::DuplicateQueryName { name }
            | RegistryError::PrepareFailed { name, .. }
            | RegistryError::UnknownQuery { name }
            | RegistryError::KindMismatch { name, .. }
            | RegistryError::QueryExecution { name, .. } => Some(name),
            RegistryError::TransactionAborted { source } => source.query_name(),
            _ => None,
        }
    }

    /// The SQLite extended result code behind this error, if any
    pub fn sqlite_code(&self) -> Option<i32> {
        match self {
            RegistryError::PrepareFailed { sqlite_code, .. }
            | RegistryError::QueryExecution { sqlite_code, .. } => *sqlite_code,
            RegistryError::TransactionAborted { source } => source.sqlite_code(),
            _ => None,
        }
    }

    /// Whether the underlying failure was a SQLite constraint violation
    /// (primary key, unique, foreign key, not null, check)
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_code()
            .map(|code| code & 0xff == SQLITE_CONSTRAINT)
            .unwrap_or(false)
    }

    /// Walk through transaction wrappers to the error that started it
    pub fn root_cause(&self) -> &RegistryError {
        match self {
            RegistryError::TransactionAborted { source } => source.root_cause(),
            other => other,
        }
    }
}
