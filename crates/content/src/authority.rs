//! Authorities and path-root dispatch.
//!
//! An authority is a named content source. Requests are routed by the first
//! segment of their content path to a [`PathRoot`]; there is exactly one
//! dispatch per request, with no fallback when the segment is unknown.

use crate::content::{Content, Params};
use crate::error::{ErrorKind, Result};
use crate::path::ContentPath;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolves the remainder of a content path below one root segment.
#[async_trait]
pub trait PathRoot: Send + Sync {
    /// `path` has already had the root segment removed.
    async fn resolve(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content>;
}

/// A named content source.
#[async_trait]
pub trait Authority: Send + Sync {
    fn name(&self) -> &str;

    /// How often the provider should refresh this authority, if at all.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }

    async fn resolve(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content>;

    /// Queue a refresh and drain the command queue.
    async fn refresh_content(&self) -> Result<()>;
}

/// Path roots keyed by their root segment.
#[derive(Clone, Default)]
pub struct PathRoots {
    roots: HashMap<String, Arc<dyn PathRoot>>,
}

impl PathRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, segment: impl Into<String>, root: Arc<dyn PathRoot>) {
        self.roots.insert(segment.into(), root);
    }

    pub fn contains(&self, segment: &str) -> bool {
        self.roots.contains_key(segment)
    }

    /// Route `path` to the root registered for its first segment.
    pub async fn dispatch(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content> {
        let Some(segment) = path.root() else {
            exn::bail!(ErrorKind::NotFound(format!("empty path: {path}")));
        };
        let Some(root) = self.roots.get(segment) else {
            exn::bail!(ErrorKind::NotFound(format!("no path root for {segment}")));
        };
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        root.resolve(&path.rest(), params, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::Record;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl PathRoot for Echo {
        async fn resolve(&self, path: &ContentPath, _params: &Params, _cancel: &CancellationToken) -> Result<Content> {
            let record = Record::from_value(json!({"rest": path.relative_path()})).unwrap_or_default();
            Ok(Content::Record(record))
        }
    }

    fn roots() -> PathRoots {
        let mut roots = PathRoots::new();
        roots.insert("~posts", Arc::new(Echo));
        roots
    }

    #[tokio::test]
    async fn test_dispatch_passes_rest() {
        let content = roots().dispatch(&ContentPath::parse("~posts/2024/a.html"), &Params::new(), &CancellationToken::new()).await.unwrap();
        let Content::Record(record) = content else { panic!("expected record") };
        assert_eq!(record.get_str("rest"), Some("2024/a.html"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_root() {
        let err = roots().dispatch(&ContentPath::parse("~pages/a.html"), &Params::new(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dispatch_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = roots().dispatch(&ContentPath::parse("~posts"), &Params::new(), &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }
}
