//! The CMS-backed content authority and its sync protocol.

mod authority;
pub mod filedb;
pub mod fileset;
pub mod protocol;
pub mod repository;
pub mod roots;
pub mod schema;
pub mod settings;

pub use crate::cms::authority::{AuthorityOptions, Collaborators, ContentAuthority};
pub use crate::cms::fileset::{FilesetConfig, Filesets};
pub use crate::cms::repository::{LogoutNotice, LogoutPolicy, Repository};
pub use crate::cms::settings::Settings;
