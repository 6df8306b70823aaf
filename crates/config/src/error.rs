//! Configuration Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source couldn't be read or doesn't match the expected shape.
    #[display("could not load configuration")]
    Load,
    /// The file extension doesn't name a supported format.
    #[display("unsupported configuration format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// A field holds a value that can't be used.
    #[display("invalid configuration value: {_0}")]
    Invalid(#[error(not(source))] String),
    #[display("no authority named {_0} is configured")]
    UnknownAuthority(#[error(not(source))] String),
}
