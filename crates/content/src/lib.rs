//! Content authorities for cairn.
//!
//! A [`Provider`] owns a set of named [`Authority`] instances and the one
//! command queue they share. The CMS authority in [`cms`] keeps a local
//! SQLite mirror of a remote repository up to date and serves content paths
//! from it, falling back to the server for files it does not cache.

pub mod auth;
pub mod authority;
pub mod cms;
mod content;
pub mod convert;
pub mod error;
pub mod http;
mod path;
mod provider;

pub use crate::authority::{Authority, PathRoot, PathRoots};
pub use crate::content::{Content, FileHandle, HTML_MIME, JSON_MIME, Params, mime_for_ext};
pub use crate::path::ContentPath;
pub use crate::provider::Provider;
