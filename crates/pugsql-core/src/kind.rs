//! Kind table
//!
//! A kind fixes the calling and return shape of a named query. The set of
//! kinds is closed: the table below is the only place identifiers are
//! mapped, and compiling a spec against it yields a [`QueryShape`] that the
//! store executes.

use crate::errors::{RegistryError, Result};
use crate::parser::QuerySpec;
use std::fmt;

/// The calling/return contract of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Execute, returning the change count and last insert rowid
    Run,
    /// Execute, returning the number of rows changed
    Changes,
    /// Execute, returning the last inserted rowid
    LastRowId,
    /// First row, or one column of it
    Get,
    /// Every row, or one column of each
    All,
    /// First column of the first row
    One,
    /// First column of every row
    List,
    /// Whether any row matched
    Exists,
    /// Single or batched insert returning the last rowid
    Insert,
}

/// Identifier → kind, as written in annotation headers.
pub const KIND_TABLE: &[(&str, QueryKind)] = &[
    ("run", QueryKind::Run),
    ("changes", QueryKind::Changes),
    ("lastRowID", QueryKind::LastRowId),
    ("get", QueryKind::Get),
    ("all", QueryKind::All),
    ("one", QueryKind::One),
    ("list", QueryKind::List),
    ("exists", QueryKind::Exists),
    ("insert", QueryKind::Insert),
];

impl QueryKind {
    /// Look up a kind by its annotation identifier (case-sensitive)
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        KIND_TABLE
            .iter()
            .find(|(id, _)| *id == identifier)
            .map(|(_, kind)| *kind)
    }

    /// The identifier used for this kind in annotation headers
    pub fn identifier(self) -> &'static str {
        KIND_TABLE
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(id, _)| *id)
            .unwrap_or("?")
    }

    /// Only `get` and `all` take an argument (the column to return)
    pub fn accepts_argument(self) -> bool {
        matches!(self, QueryKind::Get | QueryKind::All)
    }

    /// Every kind, in table order
    pub fn all() -> impl Iterator<Item = QueryKind> {
        KIND_TABLE.iter().map(|(_, kind)| *kind)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// A kind bound to its argument, ready to execute against a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    Run,
    Changes,
    LastRowId,
    Get { column: Option<String> },
    All { column: Option<String> },
    One,
    List,
    Exists,
    Insert,
}

impl QueryShape {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryShape::Run => QueryKind::Run,
            QueryShape::Changes => QueryKind::Changes,
            QueryShape::LastRowId => QueryKind::LastRowId,
            QueryShape::Get { .. } => QueryKind::Get,
            QueryShape::All { .. } => QueryKind::All,
            QueryShape::One => QueryKind::One,
            QueryShape::List => QueryKind::List,
            QueryShape::Exists => QueryKind::Exists,
            QueryShape::Insert => QueryKind::Insert,
        }
    }

    /// The column selected by a `get`/`all` argument
    pub fn column(&self) -> Option<&str> {
        match self {
            QueryShape::Get { column } | QueryShape::All { column } => column.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column() {
            Some(column) => write!(f, "{}({})", self.kind(), column),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Resolve a parsed spec against the kind table
///
/// Fails with `UnknownKind` when the identifier is not in the table and with
/// `InvalidArgument` when an argument is given to a kind that takes none.
pub fn compile(spec: &QuerySpec) -> Result<QueryShape> {
    let kind =
        QueryKind::from_identifier(&spec.kind).ok_or_else(|| RegistryError::UnknownKind {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
        })?;

    if spec.arg.is_some() && !kind.accepts_argument() {
        return Err(RegistryError::InvalidArgument {
            name: spec.name.clone(),
            kind,
        });
    }

    let column = spec.arg.clone();
    Ok(match kind {
        QueryKind::Run => QueryShape::Run,
        QueryKind::Changes => QueryShape::Changes,
        QueryKind::LastRowId => QueryShape::LastRowId,
        QueryKind::Get => QueryShape::Get { column },
        QueryKind::All => QueryShape::All { column },
        QueryKind::One => QueryShape::One,
        QueryKind::List => QueryShape::List,
        QueryKind::Exists => QueryShape::Exists,
        QueryKind::Insert => QueryShape::Insert,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str, arg: Option<&str>) -> QuerySpec {
        QuerySpec {
            name: "q".to_string(),
            kind: kind.to_string(),
            arg: arg.map(str::to_string),
            sql: "select 1\n".to_string(),
            source_line: 1,
        }
    }

    #[test]
    fn test_identifiers_round_trip() {
        for kind in QueryKind::all() {
            assert_eq!(QueryKind::from_identifier(kind.identifier()), Some(kind));
        }
        assert_eq!(QueryKind::all().count(), 9);
    }

    #[test]
    fn test_identifier_is_case_sensitive() {
        assert_eq!(
            QueryKind::from_identifier("lastRowID"),
            Some(QueryKind::LastRowId)
        );
        assert_eq!(QueryKind::from_identifier("lastrowid"), None);
        assert_eq!(QueryKind::from_identifier("Get"), None);
    }

    #[test]
    fn test_compile_column_argument() {
        let shape = compile(&spec("get", Some("b"))).unwrap();
        assert_eq!(
            shape,
            QueryShape::Get {
                column: Some("b".to_string())
            }
        );
        assert_eq!(shape.column(), Some("b"));
        assert_eq!(shape.kind(), QueryKind::Get);
        assert_eq!(shape.to_string(), "get(b)");
    }

    #[test]
    fn test_compile_unknown_kind() {
        let err = compile(&spec("pluck", None)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownKind {
                name: "q".to_string(),
                kind: "pluck".to_string()
            }
        );
    }

    #[test]
    fn test_compile_rejects_argument_for_one() {
        let err = compile(&spec("one", Some("a"))).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARGUMENT");
    }
}
