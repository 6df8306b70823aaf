//! Resolved content handed back to the host.

use cairn_store::{Record, ResultSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Query parameters accompanying a content path, e.g. `?type=page`.
pub type Params = BTreeMap<String, String>;

/// A file on disk backing a response.
#[derive(Debug)]
pub enum FileHandle {
    /// A file in the cache or packaged content. Owned by the cache.
    Cached(PathBuf),
    /// A download of uncached content, removed when the handle is dropped.
    Temporary(TempPath),
}
impl FileHandle {
    pub fn path(&self) -> &Path {
        match self {
            Self::Cached(path) => path,
            Self::Temporary(temp) => temp,
        }
    }
}

/// The outcome of resolving a content path.
#[derive(Debug)]
pub enum Content {
    /// Rows of a category query, hydrated with the category's mappings.
    Query(ResultSet),
    /// A single hydrated record.
    Record(Record),
    /// Serialised content produced by a converter.
    Data { bytes: Vec<u8>, mime: &'static str },
    /// Raw file content.
    File { file: FileHandle, mime: Option<&'static str> },
}

impl Content {
    pub fn mime(&self) -> Option<&'static str> {
        match self {
            Self::Query(_) | Self::Record(_) => Some(JSON_MIME),
            Self::Data { mime, .. } => Some(mime),
            Self::File { mime, .. } => *mime,
        }
    }
}

pub const JSON_MIME: &str = "application/json";
pub const HTML_MIME: &str = "text/html";

/// Guess a MIME type from a file extension.
pub fn mime_for_ext(ext: &str) -> Option<&'static str> {
    Some(match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => HTML_MIME,
        "json" => JSON_MIME,
        "css" => "text/css",
        "js" => "text/javascript",
        "txt" | "md" => "text/plain",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => return None,
    })
}
