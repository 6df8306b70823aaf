//! The file database of a CMS authority.
//!
//! Wraps the authority's [`Store`] together with the ORM over its `files`
//! table, the fileset definitions and the cache directory, so that a file
//! row's cache location can always be derived from the row itself.

use crate::cms::fileset::Filesets;
use crate::cms::schema::FILES;
use crate::error::{ErrorKind, Result};
use cairn_storage::CacheDirectory;
use cairn_store::{Database, MappingConfig, Orm, Record, Schema, Store, Value};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct FileDb {
    store: Store,
    orm: Orm,
    cache: CacheDirectory,
    filesets: Filesets,
}

impl FileDb {
    /// Open the store on `db`, creating any missing tables.
    ///
    /// Fails if a fileset names a mapping the ORM doesn't declare.
    pub async fn open(
        db: Database,
        schema: Schema,
        mappings: &BTreeMap<String, MappingConfig>,
        cache: CacheDirectory,
        filesets: Filesets,
    ) -> Result<Self> {
        let schema = Arc::new(schema);
        let orm = Orm::new(Arc::clone(&schema), FILES, mappings).or_raise(|| ErrorKind::Config("ORM mappings".to_string()))?;
        for fileset in filesets.iter() {
            if let Some(missing) = fileset.mappings.iter().find(|name| orm.mapping(name).is_none()) {
                exn::bail!(ErrorKind::Config(format!("fileset {} uses unknown mapping {missing}", fileset.category)));
            }
        }
        let store = Store::open(db, schema).await.or_raise(|| ErrorKind::Store)?;
        Ok(Self { store, orm, cache, filesets })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn cache(&self) -> &CacheDirectory {
        &self.cache
    }

    pub fn filesets(&self) -> &Filesets {
        &self.filesets
    }

    /// Where a file row's content is cached, or `None` for uncached categories.
    pub fn cache_location(&self, file: &Record) -> Result<Option<PathBuf>> {
        let (Some(category), Some(path)) = (file.get_str("category"), file.get_str("path")) else {
            return Ok(None);
        };
        let policy = self.filesets.policy(category);
        self.cache.file_location(policy, category, file.get_str("status"), path).or_raise(|| ErrorKind::Storage)
    }

    /// Directory a category's fileset is unpacked into, if it's cached.
    pub fn fileset_location(&self, category: &str) -> Option<PathBuf> {
        let fileset = self.filesets.get(category)?;
        self.cache.fileset_location(fileset.cache, category)
    }

    /// The plain `files` row with the given path.
    pub async fn file_with_path(&self, path: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT * FROM {FILES} WHERE path = ? LIMIT 1");
        let mut rows = self.store.perform_query(&sql, &[Value::from(path)]).await.or_raise(|| ErrorKind::Store)?;
        Ok(rows.pop())
    }

    /// Cache location of the file with the given path, if it exists on disk.
    pub async fn cached_file_with_path(&self, path: &str) -> Result<Option<PathBuf>> {
        let Some(file) = self.file_with_path(path).await? else {
            return Ok(None);
        };
        let Some(location) = self.cache_location(&file)? else {
            return Ok(None);
        };
        Ok(tokio::fs::try_exists(&location).await.unwrap_or(false).then_some(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::fileset::{FilesetConfig, standard_filesets};
    use crate::cms::schema::{build_schema, standard_mappings, standard_tables};
    use cairn_storage::{CachePolicy, CacheRoots};
    use serde_json::json;

    async fn filedb(base: &std::path::Path) -> FileDb {
        let db = Database::connect_in_memory().await.unwrap();
        let schema = build_schema(&standard_tables()).unwrap();
        let filesets = Filesets::new(&standard_filesets()).unwrap();
        let cache = CacheRoots::under(base).for_authority("acme");
        FileDb::open(db, schema, &standard_mappings(), cache, filesets).await.unwrap()
    }

    fn file(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_cache_location() {
        let dir = tempfile::tempdir().unwrap();
        let db = filedb(dir.path()).await;
        let image = file(json!({"id": 1, "path": "media/logo.png", "category": "images", "status": "published"}));
        assert_eq!(db.cache_location(&image).unwrap(), Some(dir.path().join("content/acme/~images/media/logo.png")));
        let post = file(json!({"id": 2, "path": "posts/a.json", "category": "posts", "status": "published"}));
        assert_eq!(db.cache_location(&post).unwrap(), None);
        let packaged = file(json!({"id": 3, "path": "intro.html", "category": "posts", "status": "packaged"}));
        assert_eq!(db.cache_location(&packaged).unwrap(), Some(dir.path().join("packaged/acme/intro.html")));
        let orphan = file(json!({"id": 4}));
        assert_eq!(db.cache_location(&orphan).unwrap(), None);
    }

    #[tokio::test]
    async fn test_fileset_location() {
        let dir = tempfile::tempdir().unwrap();
        let db = filedb(dir.path()).await;
        assert_eq!(db.fileset_location("templates"), Some(dir.path().join("app/acme/~templates")));
        assert_eq!(db.fileset_location("posts"), None);
        assert_eq!(db.fileset_location("unknown"), None);
    }

    #[tokio::test]
    async fn test_cached_file_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = filedb(dir.path()).await;
        let row = file(json!({"id": 7, "path": "_templates/post.html", "category": "templates", "status": "published"}));
        db.store().upsert(FILES, &row).await.unwrap();
        assert_eq!(db.cached_file_with_path("_templates/post.html").await.unwrap(), None);

        let location = dir.path().join("app/acme/~templates/_templates/post.html");
        cairn_storage::write_atomic(&location, b"<p>{{ post.body }}</p>".to_vec()).await.unwrap();
        assert_eq!(db.cached_file_with_path("_templates/post.html").await.unwrap(), Some(location));
        assert_eq!(db.cached_file_with_path("_templates/missing.html").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_fileset_mapping() {
        let db = Database::connect_in_memory().await.unwrap();
        let schema = build_schema(&standard_tables()).unwrap();
        let configs = BTreeMap::from([("posts".to_string(), FilesetConfig::new(CachePolicy::None).mappings(["author"]))]);
        let filesets = Filesets::new(&configs).unwrap();
        let cache = CacheRoots::under("/tmp/cairn").for_authority("acme");
        let err = FileDb::open(db, schema, &standard_mappings(), cache, filesets).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Config(msg) if msg.contains("author")));
    }
}
