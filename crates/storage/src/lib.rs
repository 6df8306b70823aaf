//! On-device storage for cached content.
//!
//! Resolves where a file or fileset lives for a given [`CachePolicy`],
//! places downloaded content atomically, and unpacks fileset archives.

pub mod archive;
mod atomic;
mod cache;
pub mod error;
mod path;
mod policy;

pub use crate::atomic::{move_into_place, write_atomic};
pub use crate::cache::{CacheDirectory, CacheRoots, PACKAGED_STATUS};
pub use crate::path::{join_under, validate as validate_path};
pub use crate::policy::{CachePolicy, UnknownPolicy};
