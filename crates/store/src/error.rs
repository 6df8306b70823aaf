//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A table name that the schema does not declare.
    #[display("unknown table: {_0}")]
    UnknownTable(#[error(not(source))] String),
    /// A column name that the table does not declare.
    #[display("unknown column: {_0}.{_1}")]
    UnknownColumn(#[error(not(source))] String, String),
    /// A relation mapping name that the ORM does not declare.
    #[display("unknown mapping: {_0}")]
    UnknownMapping(#[error(not(source))] String),
    /// The table doesn't tag a column with the role needed by the operation.
    #[display("table {_0} has no column tagged `{_1}`")]
    MissingTag(#[error(not(source))] String, &'static str),
    /// Schema or mapping configuration is inconsistent.
    #[display("invalid schema: {_0}")]
    Schema(#[error(not(source))] String),
    /// A value that can't be stored in or decoded from SQLite.
    #[display("invalid value for column {_0}")]
    InvalidValue(#[error(not(source))] String),
}

