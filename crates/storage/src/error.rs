//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes its root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Archive is corrupt or uses an unsupported layout
    #[display("invalid archive: {_0}")]
    Archive(#[error(not(source))] String),
    /// The operation observed its cancellation token and stopped.
    #[display("operation cancelled")]
    Cancelled,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Map an I/O error to the most specific kind for `path`.
    pub(crate) fn io(err: IoError, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    ///
    /// A corrupt archive or an escaping path fails the same way every time;
    /// an interrupted or cancelled operation can simply be run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Io(IoError::other("disk full")), true)]
    #[case(ErrorKind::Cancelled, true)]
    #[case(ErrorKind::Archive("unreadable archive".to_string()), false)]
    #[case(ErrorKind::InvalidPath(PathBuf::from("../escape.txt")), false)]
    #[case(ErrorKind::NotFound(PathBuf::from("fileset.zip")), false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
