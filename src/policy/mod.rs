//! Read-only query policy.
//!
//! Decides whether a statement may be sent to the engine. The gate is the
//! trimmed, case-folded `SELECT` prefix; statements that pass it are then
//! parsed so that stacked statements and `SELECT ... INTO` cannot ride in
//! behind a `SELECT` keyword.

mod parser;

pub use parser::{classify_sql, Classification, SqlClassifier};

use crate::db::Backend;
use std::fmt;
use tracing::warn;

/// The kind of statement detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    SelectInto,
    Insert,
    Update,
    Delete,
    Merge,
    Drop,
    Truncate,
    Alter,
    Create,
    Grant,
    Revoke,
    /// Statement kind could not be determined; holds the leading keyword.
    Other(String),
}

impl StatementKind {
    /// Derives a kind from the first keyword of the statement text.
    pub fn from_leading_keyword(sql: &str) -> Self {
        let keyword: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "DROP" => Self::Drop,
            "TRUNCATE" => Self::Truncate,
            "ALTER" => Self::Alter,
            "CREATE" => Self::Create,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            _ => Self::Other(keyword),
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "SELECT"),
            Self::SelectInto => write!(f, "SELECT INTO"),
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Merge => write!(f, "MERGE"),
            Self::Drop => write!(f, "DROP"),
            Self::Truncate => write!(f, "TRUNCATE"),
            Self::Alter => write!(f, "ALTER"),
            Self::Create => write!(f, "CREATE"),
            Self::Grant => write!(f, "GRANT"),
            Self::Revoke => write!(f, "REVOKE"),
            Self::Other(keyword) if keyword.is_empty() => write!(f, "Unknown"),
            Self::Other(keyword) => write!(f, "{}", keyword),
        }
    }
}

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// The text is empty or whitespace.
    Empty,
    /// The text does not start with `SELECT`.
    NotSelect(StatementKind),
    /// More than one statement was supplied.
    MultipleStatements,
    /// The statement starts with `SELECT` but writes data.
    NotReadOnly(StatementKind),
    /// Strict mode: the statement could not be parsed.
    Unparseable(String),
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty statement"),
            Self::NotSelect(kind) => write!(
                f,
                "{} statements are not allowed; only SELECT queries may be executed",
                kind
            ),
            Self::MultipleStatements => write!(
                f,
                "multiple statements are not allowed; submit a single SELECT query"
            ),
            Self::NotReadOnly(kind) => write!(
                f,
                "{} modifies data; only read-only SELECT queries may be executed",
                kind
            ),
            Self::Unparseable(reason) => write!(f, "could not parse statement: {}", reason),
        }
    }
}

/// The read-only gate applied before any engine interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOnlyPolicy {
    strict: bool,
}

impl ReadOnlyPolicy {
    /// Creates a policy that forwards unparseable `SELECT` text.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that also rejects unparseable text.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Checks a statement against the policy.
    pub fn check(&self, sql: &str, backend: Backend) -> Result<(), PolicyViolation> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(PolicyViolation::Empty);
        }

        if !trimmed.to_uppercase().starts_with("SELECT") {
            return Err(PolicyViolation::NotSelect(StatementKind::from_leading_keyword(
                trimmed,
            )));
        }

        match SqlClassifier::for_backend(backend).classify(trimmed) {
            Ok(Classification::ReadOnly) => Ok(()),
            Ok(Classification::Multiple) => Err(PolicyViolation::MultipleStatements),
            Ok(Classification::Writes(kind)) => Err(PolicyViolation::NotReadOnly(kind)),
            Err(reason) if self.strict => Err(PolicyViolation::Unparseable(reason)),
            Err(reason) => {
                warn!("Forwarding SELECT the parser could not read: {}", reason);
                Ok(())
            }
        }
    }
}
