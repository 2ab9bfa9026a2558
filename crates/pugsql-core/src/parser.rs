//! Annotation parser
//!
//! Turns annotated SQL text into an ordered list of query specs:
//!
//! ```text
//! -- :name get_user :get
//! select * from users where id = :id
//! ```
//!
//! Headers start in column 0; an indented `-- :name` line is body text.
//! Bodies are opaque. Blank lines are dropped, every other line is trimmed
//! and kept with a trailing newline. Structural problems (a body with no
//! header, a malformed header, a header with no body) fail the whole parse.

#![allow(clippy::result_large_err)]

use crate::errors::{RegistryError, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// One parsed `:name`/`:kind` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub name: String,
    /// Kind identifier as written; resolved against the kind table later
    pub kind: String,
    pub arg: Option<String>,
    pub sql: String,
    /// 1-based line of the header
    pub source_line: usize,
}

impl QuerySpec {
    /// Render the header line this spec was parsed from, normalized to the
    /// parenthesized argument form
    pub fn header(&self) -> String {
        match &self.arg {
            Some(arg) => format!("-- :name {} :{}({})", self.name, self.kind, arg),
            None => format!("-- :name {} :{}", self.name, self.kind),
        }
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        f.write_str(&self.sql)
    }
}

fn header_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^--[ \t]+:name\b").expect("static regex"))
}

fn header_line() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(
            r"^--[ \t]+:name[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]+:([A-Za-z_][A-Za-z0-9_]*)(?:\(([^()]*)\)|[ \t]+([^()\s][^()]*?))?[ \t]*$",
        )
        .expect("static regex")
    })
}

/// Parse a header line. `Ok(None)` means the line is not a header at all.
fn parse_header(line: &str, line_no: usize) -> Result<Option<QuerySpec>> {
    if !header_prefix().is_match(line) {
        return Ok(None);
    }

    let caps = header_line()
        .captures(line)
        .ok_or_else(|| RegistryError::ParseStructure {
            line: line_no,
            reason: format!("malformed header '{}'", line),
        })?;

    let arg = caps
        .get(3)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Some(QuerySpec {
        name: caps[1].to_string(),
        kind: caps[2].to_string(),
        arg,
        sql: String::new(),
        source_line: line_no,
    }))
}

fn finish(spec: QuerySpec, specs: &mut Vec<QuerySpec>) -> Result<()> {
    if spec.sql.trim().is_empty() {
        return Err(RegistryError::ParseStructure {
            line: spec.source_line,
            reason: format!("query '{}' has no SQL body", spec.name),
        });
    }
    specs.push(spec);
    Ok(())
}

/// Parse annotated SQL text into specs, in source order
pub fn parse_str(text: &str) -> Result<Vec<QuerySpec>> {
    let mut specs = Vec::new();
    let mut current: Option<QuerySpec> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(header) = parse_header(raw.trim_end(), line_no)? {
            if let Some(done) = current.replace(header) {
                finish(done, &mut specs)?;
            }
            continue;
        }

        match current.as_mut() {
            Some(spec) => {
                spec.sql.push_str(line);
                spec.sql.push('\n');
            }
            None => {
                return Err(RegistryError::ParseStructure {
                    line: line_no,
                    reason: "SQL before the first '-- :name' header".to_string(),
                })
            }
        }
    }

    if let Some(done) = current {
        finish(done, &mut specs)?;
    }

    Ok(specs)
}

/// Parse an annotation file
pub fn parse_file(path: &Path) -> Result<Vec<QuerySpec>> {
    let content = fs::read_to_string(path).map_err(|e| RegistryError::Io {
        op: format!("read {}", path.display()),
        cause: e.to_string(),
    })?;

    parse_str(&content)
}
