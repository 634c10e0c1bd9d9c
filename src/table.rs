//! Validated SQL identifiers for source tables and the ledger.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::CompactError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should compile"));

/// Name of a table in the row store.
///
/// Only plain identifiers are accepted, and names reserved by SQLite
/// (`sqlite_` prefix) are rejected. Names are still quoted when rendered into
/// SQL, so validation and quoting are independent guards.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validate `name` as a table identifier.
    pub fn new(name: impl Into<String>) -> Result<Self, CompactError> {
        let name = name.into();
        if !IDENTIFIER.is_match(&name) || name.to_ascii_lowercase().starts_with("sqlite_") {
            return Err(CompactError::InvalidTableName(name));
        }
        Ok(Self(name))
    }

    /// The raw, unquoted name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a double-quoted SQL identifier.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = CompactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::new(s)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quote `name` as a SQL identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote `value` as a SQL string literal, doubling embedded quotes.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
