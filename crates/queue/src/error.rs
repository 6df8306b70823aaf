//! Queue Error Types

use derive_more::{Display, Error};

/// A queue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("queue database error")]
    Database,
    /// A persisted command row could not be decoded.
    #[display("invalid queued command {_0}")]
    InvalidData(#[error(not(source))] i64),
    /// No handler is registered for the command's namespace.
    #[display("no handler for command: {_0}")]
    UnknownCommand(#[error(not(source))] String),
    /// A handler ran and failed. The handler's own error is the child frame.
    #[display("command failed: {_0}")]
    Failed(#[error(not(source))] String),
    /// Raised by handler implementations for failures worth retrying.
    #[display("{_0}")]
    Handler(#[error(not(source))] String),
    /// Raised by handler implementations when the command can never succeed,
    /// e.g. malformed arguments. The command is dropped without retrying.
    #[display("command rejected: {_0}")]
    Rejected(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Failed(_) | Self::Handler(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Database, true)]
    #[case(ErrorKind::Handler("timeout".to_string()), true)]
    #[case(ErrorKind::Rejected("missing category".to_string()), false)]
    #[case(ErrorKind::UnknownCommand("acme.publish".to_string()), false)]
    #[case(ErrorKind::InvalidData(7), false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
