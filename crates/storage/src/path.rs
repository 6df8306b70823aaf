//! Relative path validation.
//!
//! Every path that arrives from the server (file rows, archive entries,
//! content paths) is joined onto a cache root, so it must never be able to
//! climb out of that root.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Validate and normalise a path relative to some root.
///
/// Leading `/` and `.` components are dropped and `..` is resolved, but a
/// path that would leave the root, is empty, or contains a null byte is
/// rejected with [`InvalidPath`](ErrorKind::InvalidPath).
///
/// ```
/// use std::path::Path;
/// use cairn_storage::validate_path;
/// assert_eq!(validate_path("2024/article.html").unwrap(), Path::new("2024/article.html"));
/// assert_eq!(validate_path("/images/./logo.png").unwrap(), Path::new("images/logo.png"));
/// assert!(validate_path("../secrets").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // paths in the underlying syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Join a server-supplied relative path onto `root`, validating it first.
pub fn join_under(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(root.as_ref().join(validate(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2024/article.html", "2024/article.html")]
    #[case("logo.png", "logo.png")]
    #[case("/~posts/42.json", "~posts/42.json")]
    #[case("a//b/./c/", "a/b/c")]
    #[case("drafts/../published/post.html", "published/post.html")]
    fn test_valid_paths(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("//")]
    #[case("..")]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("a\0b")]
    fn test_invalid_paths(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_join_under() {
        let root = Path::new("/cache/site/~images");
        assert_eq!(join_under(root, "/logo.png").unwrap(), Path::new("/cache/site/~images/logo.png"));
        assert!(join_under(root, "../../other").is_err());
    }
}
