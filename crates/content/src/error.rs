//! Content Error Types
//!
//! Errors from the store, queue and storage crates are raised into one of
//! these kinds at the boundary, so callers only ever match on what they can
//! act on.

use derive_more::{Display, Error};

/// A content error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for content operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Unknown authority, path root, record or file.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The server rejected the stored credentials.
    #[display("authentication failure")]
    Authentication,
    /// Transport failure talking to the server.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The server sent something other than what the protocol expects.
    #[display("malformed server payload: {_0}")]
    DataIntegrity(#[error(not(source))] String),
    #[display("content store error")]
    Store,
    #[display("command queue error")]
    Queue,
    #[display("cache storage error")]
    Storage,
    /// No converter can produce the requested type.
    #[display("unsupported type: {_0}")]
    UnsupportedType(#[error(not(source))] String),
    /// A query parameter doesn't name a queryable column.
    #[display("invalid parameter: {_0}")]
    InvalidParameter(#[error(not(source))] String),
    /// Authority or fileset configuration is inconsistent.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    #[display("template error: {_0}")]
    Template(#[error(not(source))] String),
    #[display("credential storage error")]
    Credentials,
    #[display("operation cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Store | Self::Queue | Self::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::Network("timeout".to_string()).is_retryable());
        assert!(ErrorKind::Store.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::NotFound("~posts".to_string()).is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
