//! Path root for post categories, rendering post bodies to HTML.
//!
//! A post is rendered with the first template found in the cache of:
//! `_templates/post-{type}.html`, then `_templates/post.html`. The template
//! sees the hydrated file record, so the post itself is under `post`. With
//! no template the body is wrapped in a paragraph.

use crate::authority::PathRoot;
use crate::cms::roots::category::{CategoryPathRoot, Lookup};
use crate::content::{Content, HTML_MIME, Params};
use crate::error::{ErrorKind, Result};
use crate::path::ContentPath;
use async_trait::async_trait;
use cairn_store::{Record, Value};
use exn::ResultExt;
use tokio_util::sync::CancellationToken;
use upon::Engine;

pub struct PostPathRoot {
    inner: CategoryPathRoot,
}

impl PostPathRoot {
    pub fn new(inner: CategoryPathRoot) -> Self {
        Self { inner }
    }

    async fn template_for(&self, post_type: &str) -> Result<Option<String>> {
        let filedb = self.inner.repository().filedb();
        for name in [format!("_templates/post-{post_type}.html"), "_templates/post.html".to_string()] {
            if let Some(location) = filedb.cached_file_with_path(&name).await? {
                return tokio::fs::read_to_string(&location).await.map(Some).or_raise(|| ErrorKind::Template(name));
            }
        }
        Ok(None)
    }

    /// Render a hydrated post record to HTML.
    pub async fn render(&self, record: &Record) -> Result<String> {
        let post = record.get("post");
        let field = |name: &str| post.and_then(|p| p.get(name)).and_then(Value::as_str).unwrap_or_default().to_string();
        let post_type = field("type");
        match self.template_for(&post_type).await? {
            Some(source) => Ok(render_template(&source, record).unwrap_or_else(|err| {
                tracing::warn!(post_type, error = %err, "post template failed");
                format!("<h1>Template error</h1><pre>{err}</pre>")
            })),
            None => {
                tracing::debug!(post_type, "no client template for post type");
                Ok(format!("<p>{}</p>", field("body")))
            },
        }
    }
}

fn render_template(source: &str, record: &Record) -> std::result::Result<String, upon::Error> {
    let engine = Engine::new();
    let template = engine.compile(source)?;
    template.render(&engine, record).to_string()
}

#[async_trait]
impl PathRoot for PostPathRoot {
    async fn resolve(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content> {
        match self.inner.lookup(path, params).await? {
            Lookup::Query(results) => self.inner.write_query(results, path.ext()),
            Lookup::Record(mut record) => {
                let html = self.render(&record).await?;
                if path.ext() == Some("html") {
                    return Ok(Content::Data { bytes: html.into_bytes(), mime: HTML_MIME });
                }
                record.insert("postHTML".to_string(), Value::String(html));
                self.inner.write_record(record, path.ext(), cancel).await
            },
        }
    }
}

