//! Fileset archive unpacking.
//!
//! Filesets are delivered as zip archives, stored or compressed with deflate
//! or bzip2. Every regular entry is written to a temporary file beside its
//! destination and renamed into place, so a cancelled or failed unpack never
//! leaves a partially written file at a cache path.

use crate::error::{ErrorKind, Result};
use crate::path::join_under;
use exn::ResultExt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use zip::ZipArchive;

/// Unpack the archive at `archive` into `dest`, returning the number of files written.
///
/// Runs on the blocking thread pool. The token is checked before every
/// entry; on cancellation the entries already moved into place remain, but
/// no entry is ever half-written.
#[instrument(skip(cancel), fields(archive = %archive.display(), dest = %dest.display()))]
pub async fn unpack(archive: PathBuf, dest: PathBuf, cancel: CancellationToken) -> Result<usize> {
    tokio::task::spawn_blocking(move || unpack_blocking(&archive, &dest, &cancel))
        .await
        .or_raise(|| ErrorKind::Archive("unpack task failed".to_string()))?
}

fn unpack_blocking(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<usize> {
    let file = File::open(archive).map_err(|e| ErrorKind::io(e, archive))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).or_raise(|| ErrorKind::Archive("unreadable archive".to_string()))?;
    tracing::debug!(entries = zip.len(), "unpacking fileset archive");

    std::fs::create_dir_all(dest).map_err(|e| ErrorKind::io(e, dest))?;
    let mut written = 0;
    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let mut entry = zip.by_index(index).or_raise(|| ErrorKind::Archive(format!("corrupt entry #{index}")))?;
        // The raw name, not `enclosed_name()`: a name that climbs out of
        // `dest` must fail the unpack rather than be skipped.
        let name = PathBuf::from(entry.name());
        if entry.is_dir() {
            // A bare "./" entry is the archive root itself.
            if let Ok(target) = join_under(dest, &name) {
                std::fs::create_dir_all(&target).map_err(|e| ErrorKind::io(e, &target))?;
            }
            continue;
        }
        if !entry.is_file() {
            tracing::debug!(entry = %name.display(), "skipping non-regular archive entry");
            continue;
        }
        let target = join_under(dest, &name)?;
        let parent = target.parent().unwrap_or(dest);
        std::fs::create_dir_all(parent).map_err(|e| ErrorKind::io(e, parent))?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| ErrorKind::io(e, parent))?;
        std::io::copy(&mut entry, temp.as_file_mut()).or_raise(|| ErrorKind::Archive(format!("truncated entry {}", name.display())))?;
        temp.persist(&target).map_err(|e| ErrorKind::io(e.error, &target))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::{Cursor, Write};
    use zip::CompressionMethod;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn zip_bytes(files: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (path, data) in files {
            writer.start_file(*path, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[rstest]
    #[case(CompressionMethod::Stored)]
    #[case(CompressionMethod::Deflated)]
    #[case(CompressionMethod::Bzip2)]
    #[tokio::test]
    async fn test_unpack(#[case] method: CompressionMethod) {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("fileset.zip");
        std::fs::write(&archive, zip_bytes(&[("logo.png", b"png"), ("icons/star.svg", b"<svg/>")], method)).unwrap();
        let dest = temp.path().join("~images");
        let written = unpack(archive, dest.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(std::fs::read(dest.join("logo.png")).unwrap(), b"png");
        assert_eq!(std::fs::read(dest.join("icons/star.svg")).unwrap(), b"<svg/>");
    }

    #[tokio::test]
    async fn test_unpack_creates_directory_entries() {
        let temp = tempfile::tempdir().unwrap();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("fonts/", SimpleFileOptions::default()).unwrap();
        let archive = temp.path().join("fileset.zip");
        std::fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();
        let dest = temp.path().join("~assets");
        let written = unpack(archive, dest.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(written, 0);
        assert!(dest.join("fonts").is_dir());
    }

    #[tokio::test]
    async fn test_unpack_overwrites_existing() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("~assets");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("app.css"), b"old").unwrap();
        let archive = temp.path().join("fileset.zip");
        std::fs::write(&archive, zip_bytes(&[("app.css", b"new")], CompressionMethod::Deflated)).unwrap();
        unpack(archive, dest.clone(), CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(dest.join("app.css")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_unpack_rejects_traversal() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("evil.zip");
        std::fs::write(&archive, zip_bytes(&[("../escape.txt", b"evil")], CompressionMethod::Stored)).unwrap();
        let dest = temp.path().join("inner/~images");
        let err = unpack(archive, dest, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(!temp.path().join("inner/escape.txt").exists());
    }

    #[tokio::test]
    async fn test_unpack_rejects_non_zip() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("fileset.tar");
        std::fs::write(&archive, b"not a zip archive").unwrap();
        let err = unpack(archive, temp.path().join("~images"), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Archive(_)));
    }

    #[tokio::test]
    async fn test_unpack_observes_cancellation() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("fileset.zip");
        std::fs::write(&archive, zip_bytes(&[("logo.png", b"png")], CompressionMethod::Stored)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dest = temp.path().join("~images");
        let err = unpack(archive, dest.clone(), cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(!dest.join("logo.png").exists());
    }
}
