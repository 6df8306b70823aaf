//! All-or-nothing placement of files at their cache location.
//!
//! Content is always written to a temporary file in the destination's own
//! directory and renamed over the destination, so a reader of the final path
//! sees either the previous file or the complete new one.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn parent_of(dest: &Path) -> Result<&Path> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent),
        _ => exn::bail!(ErrorKind::InvalidPath(dest.to_path_buf())),
    }
}

fn write_blocking(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_of(dest)?;
    std::fs::create_dir_all(parent).map_err(|e| ErrorKind::io(e, parent))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| ErrorKind::io(e, parent))?;
    temp.write_all(bytes).map_err(ErrorKind::Io)?;
    temp.as_file().sync_all().map_err(ErrorKind::Io)?;
    temp.persist(dest).map_err(|e| ErrorKind::io(e.error, dest))?;
    Ok(())
}

fn copy_blocking(src: &Path, dest: &Path) -> Result<()> {
    let parent = parent_of(dest)?;
    std::fs::create_dir_all(parent).map_err(|e| ErrorKind::io(e, parent))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| ErrorKind::io(e, parent))?;
    let mut source = std::fs::File::open(src).map_err(|e| ErrorKind::io(e, src))?;
    std::io::copy(&mut source, temp.as_file_mut()).map_err(ErrorKind::Io)?;
    temp.persist(dest).map_err(|e| ErrorKind::io(e.error, dest))?;
    std::fs::remove_file(src).map_err(|e| ErrorKind::io(e, src))?;
    Ok(())
}

/// Atomically write `bytes` to `dest`, creating parent directories.
pub async fn write_atomic(dest: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<()> {
    let dest = dest.into();
    tokio::task::spawn_blocking(move || write_blocking(&dest, &bytes))
        .await
        .or_raise(|| ErrorKind::Io(std::io::Error::other("write task failed")))?
}

/// Move a finished download into place.
///
/// A plain rename is tried first; when the source is on another filesystem
/// the content is copied into a temporary sibling of `dest` and renamed from
/// there instead.
pub async fn move_into_place(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Result<()> {
    let (src, dest) = (src.into(), dest.into());
    let parent = parent_of(&dest)?;
    tokio::fs::create_dir_all(parent).await.map_err(|e| ErrorKind::io(e, parent))?;
    match tokio::fs::rename(&src, &dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ErrorKind::io(e, &src).into()),
        Err(e) => {
            tracing::debug!(error = %e, src = %src.display(), "rename failed; copying instead");
            tokio::task::spawn_blocking(move || copy_blocking(&src, &dest))
                .await
                .or_raise(|| ErrorKind::Io(std::io::Error::other("copy task failed")))?
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_and_overwrites() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("~images/nested/logo.png");
        write_atomic(&dest, b"first".to_vec()).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"first");
        write_atomic(&dest, b"second".to_vec()).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"second");
        // No temporary files are left next to the destination.
        let mut entries = tokio::fs::read_dir(dest.parent().unwrap()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_move_into_place() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("staging/download.tmp");
        tokio::fs::create_dir_all(src.parent().unwrap()).await.unwrap();
        tokio::fs::write(&src, b"payload").await.unwrap();
        let dest = temp.path().join("content/site/~assets/app.css");
        move_into_place(&src, &dest).await.unwrap();
        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let temp = tempfile::tempdir().unwrap();
        let err = move_into_place(temp.path().join("nope"), temp.path().join("dest/file")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
