//! Cache directory layout.
//!
//! A provider owns four roots (content cache, app cache, packaged content and
//! staging). Each authority gets its own sub-directory under every root, and
//! each cached fileset category lives in `~{category}` beneath the root its
//! [`CachePolicy`] selects:
//!
//! ```text
//! {content}/{authority}/~images/logo.png
//! {app}/{authority}/~templates/_templates/post.html
//! {packaged}/{authority}/bundled/intro.html
//! ```

use crate::error::{ErrorKind, Result};
use crate::path::join_under;
use crate::policy::CachePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File status marking content bundled with the app rather than downloaded.
pub const PACKAGED_STATUS: &str = "packaged";

/// The provider-wide storage roots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRoots {
    pub content: PathBuf,
    pub app: PathBuf,
    pub packaged: PathBuf,
    pub staging: PathBuf,
}
impl CacheRoots {
    /// All four roots as sub-directories of one base directory.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            content: base.join("content"),
            app: base.join("app"),
            packaged: base.join("packaged"),
            staging: base.join("staging"),
        }
    }

    /// The directories of one authority.
    pub fn for_authority(&self, authority: &str) -> CacheDirectory {
        CacheDirectory {
            content: self.content.join(authority),
            app: self.app.join(authority),
            packaged: self.packaged.join(authority),
            staging: self.staging.join(authority),
        }
    }
}

/// Resolves cached content locations for one authority.
///
/// Locations are always derived from a file's category, status and path;
/// they are never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDirectory {
    content: PathBuf,
    app: PathBuf,
    packaged: PathBuf,
    staging: PathBuf,
}
impl CacheDirectory {
    pub fn root(&self, policy: CachePolicy) -> Option<&Path> {
        match policy {
            CachePolicy::None => None,
            CachePolicy::Content => Some(&self.content),
            CachePolicy::App => Some(&self.app),
        }
    }

    pub fn packaged(&self) -> &Path {
        &self.packaged
    }

    /// Scratch space for downloads before they are moved into place.
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Directory holding a fileset category, or `None` if it isn't cached.
    pub fn fileset_location(&self, policy: CachePolicy, category: &str) -> Option<PathBuf> {
        self.root(policy).map(|root| root.join(format!("~{category}")))
    }

    /// Location of a single file.
    ///
    /// Packaged files resolve under the packaged root regardless of policy;
    /// anything else resolves inside its category's fileset directory, or to
    /// `None` when the category isn't cached.
    pub fn file_location(
        &self,
        policy: CachePolicy,
        category: &str,
        status: Option<&str>,
        path: &str,
    ) -> Result<Option<PathBuf>> {
        if status == Some(PACKAGED_STATUS) {
            return join_under(&self.packaged, path).map(Some);
        }
        self.fileset_location(policy, category).map(|root| join_under(root, path)).transpose()
    }

    /// Remove a cached file. Missing files are not an error.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, location: &Path) -> Result<bool> {
        match tokio::fs::remove_file(location).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::io(e, location).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn directory() -> CacheDirectory {
        CacheRoots::under("/data").for_authority("acme")
    }

    #[rstest]
    #[case(CachePolicy::Content, "images", None, "logo.png", Some("/data/content/acme/~images/logo.png"))]
    #[case(CachePolicy::App, "templates", Some("published"), "_templates/post.html", Some("/data/app/acme/~templates/_templates/post.html"))]
    #[case(CachePolicy::None, "posts", Some("published"), "2024/article.html", None)]
    #[case(CachePolicy::None, "posts", Some("packaged"), "intro.html", Some("/data/packaged/acme/intro.html"))]
    fn test_file_location(
        #[case] policy: CachePolicy,
        #[case] category: &str,
        #[case] status: Option<&str>,
        #[case] path: &str,
        #[case] expected: Option<&str>,
    ) {
        let location = directory().file_location(policy, category, status, path).unwrap();
        assert_eq!(location.as_deref(), expected.map(Path::new));
    }

    #[test]
    fn test_file_location_rejects_escapes() {
        assert!(directory().file_location(CachePolicy::Content, "images", None, "../../app/x").is_err());
    }

    #[test]
    fn test_fileset_location() {
        let dir = directory();
        assert_eq!(dir.fileset_location(CachePolicy::Content, "assets"), Some(PathBuf::from("/data/content/acme/~assets")));
        assert_eq!(dir.fileset_location(CachePolicy::None, "posts"), None);
        assert_eq!(dir.staging(), Path::new("/data/staging/acme"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let dir = CacheRoots::under(temp.path()).for_authority("acme");
        let file = temp.path().join("cached.txt");
        tokio::fs::write(&file, b"data").await.unwrap();
        assert!(dir.remove(&file).await.unwrap());
        assert!(!dir.remove(&file).await.unwrap());
    }
}
