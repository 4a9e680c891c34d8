//! Error types for relmodel operations.
//!
//! Cancellation is not an error here: it travels as
//! [`Outcome::Cancelled`](asupersync::Outcome) next to `Outcome::Err`.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// A statement the driver rejected. Passed through unmodified.
    Query(QueryError),
    /// A value a column cannot convert to or from storage.
    InvalidColumnData(InvalidColumnData),
    /// Relation wiring or persistence failed.
    Relation(RelationError),
    Custom(String),
}

/// Driver-side failure of a single statement.
#[derive(Debug)]
pub struct QueryError {
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// A value presented to a column that it cannot convert.
///
/// Columns never coerce such values silently.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidColumnData {
    pub column: String,
    pub value_type: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    /// `table.attribute` of the relation.
    pub relation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// The association table does not reference the expected table.
    ColumnMismatch,
    /// Association rows were requested for a parent without a primary key.
    UnsavedParent,
}

impl Error {
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }

    pub fn invalid_column_data(
        column: impl Into<String>,
        value_type: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidColumnData(InvalidColumnData {
            column: column.into(),
            value_type,
            reason: reason.into(),
        })
    }

    pub fn relation(
        kind: RelationErrorKind,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Relation(RelationError {
            kind,
            relation: relation.into(),
            message: message.into(),
        })
    }

    /// The statement behind a driver error, if it recorded one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    pub fn is_invalid_column_data(&self) -> bool {
        matches!(self, Error::InvalidColumnData(_))
    }

    pub fn relation_kind(&self) -> Option<RelationErrorKind> {
        match self {
            Error::Relation(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "query failed: {}", e.message),
            Error::InvalidColumnData(e) => write!(
                f,
                "column '{}' rejected {} value: {}",
                e.column, e.value_type, e.reason
            ),
            Error::Relation(e) => write!(f, "relation {}: {}", e.relation, e.message),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<InvalidColumnData> for Error {
    fn from(err: InvalidColumnData) -> Self {
        Error::InvalidColumnData(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
