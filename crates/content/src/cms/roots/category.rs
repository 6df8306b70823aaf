//! Path root serving one fileset category.
//!
//! Below the category segment a path is resolved as:
//!
//! ```text
//! ~posts            query over the category (filtered by query params)
//! ~posts/$42        file with id 42
//! ~posts/2024/a     file with path `2024/a` or `posts/2024/a`
//! ```
//!
//! The extension picks a converter. With no matching converter, an
//! extension equal to the file's own returns the raw file, from the cache
//! when possible and otherwise from the server.

use crate::authority::PathRoot;
use crate::cms::repository::Repository;
use crate::content::{Content, FileHandle, Params, mime_for_ext};
use crate::error::{ErrorKind, Result};
use crate::http::Body;
use crate::path::ContentPath;
use async_trait::async_trait;
use cairn_store::{Record, ResultSet, Value};
use exn::ResultExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What a path below a category refers to, before conversion.
#[derive(Debug)]
pub enum Lookup {
    Query(ResultSet),
    Record(Record),
}

pub struct CategoryPathRoot {
    repo: Arc<Repository>,
    category: String,
}

impl CategoryPathRoot {
    pub fn new(repo: Arc<Repository>, category: impl Into<String>) -> Self {
        Self { repo, category: category.into() }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    fn mappings(&self) -> &[String] {
        self.repo.filedb().filesets().get(&self.category).map(|f| f.mappings.as_slice()).unwrap_or_default()
    }

    /// Files of this category matching every `column=value` parameter.
    pub async fn query(&self, params: &Params) -> Result<ResultSet> {
        let orm = self.repo.filedb().orm();
        let mut predicates = vec![format!("{} = ?", orm.source_column("category").or_raise(|| ErrorKind::Store)?)];
        let mut values = vec![Value::from(self.category.as_str())];
        for (name, value) in params {
            let column = orm.source_column(name).or_raise(|| ErrorKind::InvalidParameter(name.clone()))?;
            predicates.push(format!("{column} = ?"));
            values.push(Value::from(value.as_str()));
        }
        orm.select_where(self.repo.filedb().store(), self.mappings(), &predicates.join(" AND "), &values)
            .await
            .or_raise(|| ErrorKind::Store)
    }

    /// The file of this category with the given id.
    pub async fn record_with_key(&self, key: &str) -> Result<Option<Record>> {
        let key = key.parse::<i64>().map_or_else(|_| Value::from(key), Value::from);
        let orm = self.repo.filedb().orm();
        let record = orm.select_key(self.repo.filedb().store(), key, self.mappings()).await.or_raise(|| ErrorKind::Store)?;
        Ok(record.filter(|record| record.get_str("category") == Some(self.category.as_str())))
    }

    /// The file of this category at `path`, relative to the repository or
    /// to the category's own directory.
    ///
    /// An exact match (extension included) wins. Otherwise the extension is
    /// taken as an output type and any file with the same stem matches.
    pub async fn record_with_path(&self, path: &ContentPath) -> Result<Option<Record>> {
        let stem = path.segments().join("/");
        let stems = [stem.clone(), format!("{}/{stem}", self.category)];
        let column = self.repo.filedb().orm().source_column("path").or_raise(|| ErrorKind::Store)?;

        let relative = path.relative_path();
        let exact = vec![Value::from(format!("{}/{relative}", self.category)), Value::from(relative)];
        if let Some(record) = self.select_one(&format!("{column} IN (?, ?)"), exact).await? {
            return Ok(Some(record));
        }
        if path.ext().is_none() {
            return Ok(None);
        }
        let same_stem = format!("(substr({column}, 1, length(?)) = ? AND instr(substr({column}, length(?) + 1), '/') = 0)");
        let params = stems.iter().flat_map(|stem| std::iter::repeat_n(Value::from(format!("{stem}.")), 3)).collect();
        self.select_one(&format!("({same_stem} OR {same_stem})"), params).await
    }

    async fn select_one(&self, predicate: &str, mut params: Vec<Value>) -> Result<Option<Record>> {
        let orm = self.repo.filedb().orm();
        let category = orm.source_column("category").or_raise(|| ErrorKind::Store)?;
        params.push(Value::from(self.category.as_str()));
        let mut results = orm
            .select_where(self.repo.filedb().store(), self.mappings(), &format!("{predicate} AND {category} = ?"), &params)
            .await
            .or_raise(|| ErrorKind::Store)?;
        Ok((!results.is_empty()).then(|| results.swap_remove(0)))
    }

    /// Resolve a path (with the category segment already removed).
    pub async fn lookup(&self, path: &ContentPath, params: &Params) -> Result<Lookup> {
        let Some(head) = path.root() else {
            return Ok(Lookup::Query(self.query(params).await?));
        };
        let mut record = None;
        if let Some(key) = head.strip_prefix('$')
            && path.len() == 1
        {
            record = self.record_with_key(key).await?;
        }
        if record.is_none() {
            record = self.record_with_path(path).await?;
        }
        match record {
            Some(record) => Ok(Lookup::Record(record)),
            None => exn::bail!(ErrorKind::NotFound(format!("invalid path: {}", path.full_path()))),
        }
    }

    pub fn write_query(&self, results: ResultSet, ext: Option<&str>) -> Result<Content> {
        let Some(ext) = ext else {
            return Ok(Content::Query(results));
        };
        match self.repo.converters().query(ext) {
            Some(converter) => converter.convert_query(results),
            None => exn::bail!(ErrorKind::UnsupportedType(format!("query type {ext}"))),
        }
    }

    pub async fn write_record(&self, record: Record, ext: Option<&str>, cancel: &CancellationToken) -> Result<Content> {
        let Some(ext) = ext else {
            return Ok(Content::Record(record));
        };
        if let Some(converter) = self.repo.converters().record(ext) {
            return converter.convert_record(record);
        }
        let file_ext = record.get_str("path").and_then(|path| path.rsplit_once('.')).map(|(_, ext)| ext);
        if file_ext != Some(ext) {
            exn::bail!(ErrorKind::UnsupportedType(ext.to_string()));
        }
        self.raw_file(&record, cancel).await
    }

    /// The file's own content, from the cache or the server.
    #[instrument(skip_all, fields(authority = %self.repo.name(), category = %self.category))]
    async fn raw_file(&self, record: &Record, cancel: &CancellationToken) -> Result<Content> {
        let filedb = self.repo.filedb();
        let path = record.get_str("path").unwrap_or_default();
        let mime = path.rsplit_once('.').and_then(|(_, ext)| mime_for_ext(ext));
        let location = filedb.cache_location(record)?;
        if let Some(location) = &location
            && tokio::fs::try_exists(location).await.unwrap_or(false)
        {
            return Ok(Content::File { file: FileHandle::Cached(location.clone()), mime });
        }

        let request = self.repo.request(self.repo.settings().url_for_file(path)).await?;
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            response = self.repo.http().get_file(request, filedb.cache().staging()) => response?,
        };
        if response.is_unauthorized() {
            exn::bail!(ErrorKind::Authentication);
        }
        let Body::File(download) = response.body else {
            exn::bail!(ErrorKind::NotFound(format!("{path} (status {})", response.status)));
        };
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        match location {
            Some(location) => {
                cairn_storage::move_into_place(download.to_path_buf(), location.clone()).await.or_raise(|| ErrorKind::Storage)?;
                tracing::debug!(path, "cached downloaded file");
                Ok(Content::File { file: FileHandle::Cached(location), mime })
            },
            None => Ok(Content::File { file: FileHandle::Temporary(download), mime }),
        }
    }
}

#[async_trait]
impl PathRoot for CategoryPathRoot {
    async fn resolve(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content> {
        match self.lookup(path, params).await? {
            Lookup::Query(results) => self.write_query(results, path.ext()),
            Lookup::Record(record) => self.write_record(record, path.ext(), cancel).await,
        }
    }
}
