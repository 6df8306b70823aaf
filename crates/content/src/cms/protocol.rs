//! The CMS sync protocol.
//!
//! Two commands are handled for every authority:
//!
//! - `{authority}.refresh` fetches the server's delta since the latest known
//!   commit and applies it to the file database in one transaction, queueing
//!   a `download-fileset` for every cached category whose content changed;
//! - `{authority}.download-fileset [category, location, since?]` fetches a
//!   category's fileset archive and unpacks it into the cache.
//!
//! A change of the server's group fingerprint triggers a migration: every
//! file row is marked deleted before the delta is applied, so whatever the
//! delta does not resurrect is removed at the end of the same cycle.

use crate::cms::repository::Repository;
use crate::cms::schema::{COMMITS, DELETED_STATUS, FILES, FINGERPRINTS, GROUP_CATEGORY};
use crate::error::{ErrorKind, Result};
use crate::http::{Body, Response, STATUS_NO_CONTENT, STATUS_OK};
use async_trait::async_trait;
use cairn_queue::{Command, CommandHandler};
use cairn_store::schema::quote;
use cairn_store::{ColumnTag, Record, StoreTx, Value};
use exn::{OptionExt, ResultExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

pub const REFRESH: &str = "refresh";
pub const DOWNLOAD_FILESET: &str = "download-fileset";

const ACCEPT: &str = "application/json, */*;q=0.8";

/// Scope of a category's next fileset download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Since {
    /// Download the whole fileset.
    Full,
    /// Download only what changed after this commit.
    Commit(String),
}

/// A parsed refresh response.
#[derive(Debug, Default)]
struct Delta {
    group: Option<String>,
    tables: Vec<(String, Vec<Record>)>,
}

impl Delta {
    fn from_response(response: Response) -> Result<Self> {
        if !response.is_success() {
            exn::bail!(ErrorKind::DataIntegrity(format!("unexpected status {}", response.status)));
        }
        let Body::Json(Value::Object(mut body)) = response.body else {
            exn::bail!(ErrorKind::DataIntegrity("response body is not an object".to_string()));
        };
        let group = body
            .get("repository")
            .and_then(|repository| repository.get("group"))
            .and_then(|group| match group {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let tables = match body.remove("db") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(db)) => db.into_iter().map(|(table, rows)| Ok((table.clone(), Self::rows(&table, rows)?))).collect::<Result<_>>()?,
            Some(_) => exn::bail!(ErrorKind::DataIntegrity("`db` is not an object".to_string())),
        };
        Ok(Self { group, tables })
    }

    fn rows(table: &str, rows: Value) -> Result<Vec<Record>> {
        let Value::Array(rows) = rows else {
            exn::bail!(ErrorKind::DataIntegrity(format!("rows of {table} are not a list")));
        };
        rows.into_iter()
            .map(|row| Record::from_value(row).ok_or_raise(|| ErrorKind::DataIntegrity(format!("row of {table} is not an object"))))
            .collect()
    }
}

/// Command handler implementing the sync protocol for one authority.
pub struct Protocol {
    repo: Arc<Repository>,
}

impl Protocol {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Fetch and apply the server's delta, returning the follow-on downloads.
    #[instrument(skip(self), fields(authority = %self.repo.name()))]
    pub async fn refresh(&self) -> Result<Vec<Command>> {
        let store = self.repo.filedb().store();
        let group = store
            .read(FINGERPRINTS, GROUP_CATEGORY)
            .await
            .or_raise(|| ErrorKind::Store)?
            .and_then(|row| row.get_string("current"));
        let since = latest_commit(store.perform_query(&latest_commit_sql(&self.repo)?, &[]).await.or_raise(|| ErrorKind::Store)?);

        let mut request = self.repo.request(self.repo.settings().url_for_updates()).await?.header("Accept", ACCEPT);
        if let Some(group) = &group {
            request = request.param("group", group);
        }
        if let Some(since) = &since {
            request = request.param("since", since);
        }
        let response = self.repo.http().get(request).await?;
        if response.is_unauthorized() {
            self.repo.handle_unauthorized().await?;
            return Ok(Vec::new());
        }
        let delta = match Delta::from_response(response) {
            Ok(delta) => delta,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring refresh response");
                return Ok(Vec::new());
            },
        };

        let mut tx = store.begin().await.or_raise(|| ErrorKind::Store)?;
        match self.apply(&mut tx, group.as_deref(), delta).await {
            Ok(commands) => {
                tx.commit().await.or_raise(|| ErrorKind::Store)?;
                Ok(commands)
            },
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed refresh also failed");
                }
                Err(err)
            },
        }
    }

    async fn apply(&self, tx: &mut StoreTx, local_group: Option<&str>, delta: Delta) -> Result<Vec<Command>> {
        let filedb = self.repo.filedb();
        let migrate = local_group.is_none() || local_group != delta.group.as_deref();
        if migrate {
            let marked = tx
                .perform_update(&format!("UPDATE {FILES} SET status = ?"), &[Value::from(DELETED_STATUS)])
                .await
                .or_raise(|| ErrorKind::Store)?;
            tracing::info!(from = ?local_group, to = ?delta.group, marked, "group fingerprint changed; migrating");
        }
        tx.perform_update(&format!("UPDATE {FINGERPRINTS} SET \"previous\" = \"current\""), &[])
            .await
            .or_raise(|| ErrorKind::Store)?;

        let mut touched = BTreeSet::new();
        let mut upserted = 0usize;
        for (table, rows) in delta.tables {
            let Ok(declared) = tx.schema().table(&table).cloned() else {
                tracing::warn!(table, "skipping table unknown to the schema");
                continue;
            };
            let id = declared.require_tag(ColumnTag::Id).or_raise(|| ErrorKind::Store)?.to_string();
            let is_files = table == FILES;
            for mut row in rows {
                declared.apply_formats(&mut row);
                if row.get(&id).is_none_or(Value::is_null) {
                    tracing::warn!(table, "skipping row without an id");
                    continue;
                }
                if is_files {
                    self.infer_category(&mut row);
                }
                tx.upsert(&table, &row).await.or_raise(|| ErrorKind::Store)?;
                upserted += 1;
                if is_files
                    && let Some(category) = row.get_str("category")
                    && row.get_str("status") != Some(DELETED_STATUS)
                {
                    touched.insert(category.to_string());
                }
            }
        }
        if let Some(group) = &delta.group {
            let record = Record::from_iter([("category".to_string(), Value::from(GROUP_CATEGORY)), ("current".to_string(), Value::from(group.as_str()))]);
            tx.upsert(FINGERPRINTS, &record).await.or_raise(|| ErrorKind::Store)?;
        }

        let latest = latest_commit(tx.perform_query(&latest_commit_sql(&self.repo)?, &[]).await.or_raise(|| ErrorKind::Store)?);
        let mut updated: BTreeMap<String, Since> = touched
            .into_iter()
            .map(|category| (category, latest.clone().map_or(Since::Full, Since::Commit)))
            .collect();

        let removed = self.remove_deleted(tx).await?;
        let pruned = filedb.orm().prune_related(tx).await.or_raise(|| ErrorKind::Store)?;

        let changed = tx
            .perform_query(
                &format!("SELECT category FROM {FINGERPRINTS} WHERE \"current\" IS NOT \"previous\" AND category <> ?"),
                &[Value::from(GROUP_CATEGORY)],
            )
            .await
            .or_raise(|| ErrorKind::Store)?;
        for row in changed {
            if let Some(category) = row.get_string("category") {
                updated.entry(category).or_insert(Since::Full);
            }
        }

        let name = format!("{}.{DOWNLOAD_FILESET}", self.repo.name());
        let commands: Vec<Command> = updated
            .into_iter()
            .filter_map(|(category, since)| {
                let location = filedb.fileset_location(&category)?;
                let mut args = vec![category, location.to_string_lossy().into_owned()];
                if let Since::Commit(commit) = since {
                    args.push(commit);
                }
                Some(Command::new(name.clone(), args))
            })
            .collect();
        tracing::info!(upserted, removed, pruned, downloads = commands.len(), "applied content delta");
        Ok(commands)
    }

    fn infer_category(&self, row: &mut Record) {
        if row.get_str("category").is_some_and(|c| !c.is_empty()) {
            return;
        }
        let Some(path) = row.get_str("path") else { return };
        if let Some(category) = self.repo.filedb().filesets().infer_category(path) {
            row.insert("category".to_string(), Value::from(category));
        }
    }

    /// Remove the cached artifacts and rows of every file marked deleted.
    async fn remove_deleted(&self, tx: &mut StoreTx) -> Result<u64> {
        let filedb = self.repo.filedb();
        let deleted = tx
            .perform_query(&format!("SELECT * FROM {FILES} WHERE status = ?"), &[Value::from(DELETED_STATUS)])
            .await
            .or_raise(|| ErrorKind::Store)?;
        for file in &deleted {
            if let Some(location) = filedb.cache_location(file)? {
                filedb.cache().remove(&location).await.or_raise(|| ErrorKind::Storage)?;
            }
        }
        tx.perform_update(&format!("DELETE FROM {FILES} WHERE status = ?"), &[Value::from(DELETED_STATUS)])
            .await
            .or_raise(|| ErrorKind::Store)
    }

    /// Download a category's fileset and unpack it into `location`.
    #[instrument(skip(self, since), fields(authority = %self.repo.name()))]
    pub async fn download_fileset(&self, category: &str, location: PathBuf, since: Option<&str>) -> Result<()> {
        let filedb = self.repo.filedb();
        let mut request = self.repo.request(self.repo.settings().url_for_fileset(category)).await?;
        if let Some(since) = since {
            request = request.param("since", since);
        }
        let response = self.repo.http().get_file(request, filedb.cache().staging()).await?;
        match response.status {
            STATUS_OK => {
                let Body::File(archive) = response.body else {
                    exn::bail!(ErrorKind::DataIntegrity(format!("fileset {category} has no archive")));
                };
                let files = cairn_storage::archive::unpack(archive.to_path_buf(), location, self.repo.cancel().clone())
                    .await
                    .map_err(|err| {
                        let kind = match err.is_retryable() {
                            true => ErrorKind::Storage,
                            false => ErrorKind::DataIntegrity(format!("fileset {category} archive")),
                        };
                        err.raise(kind)
                    })?;
                drop(archive);
                tracing::info!(category, files, "unpacked fileset");
            },
            STATUS_NO_CONTENT => tracing::debug!(category, "fileset unchanged"),
            status => {
                tracing::warn!(category, status, "fileset download failed");
                return Ok(());
            },
        }
        filedb
            .store()
            .perform_update(&format!("UPDATE {FINGERPRINTS} SET \"previous\" = \"current\" WHERE category = ?"), &[Value::from(category)])
            .await
            .or_raise(|| ErrorKind::Store)?;
        Ok(())
    }
}

fn latest_commit_sql(repo: &Repository) -> Result<String> {
    let store = repo.filedb().store();
    let Some(id) = store.column_for_tag(COMMITS, ColumnTag::Id) else {
        exn::bail!(ErrorKind::Config(format!("table {COMMITS} has no id column")));
    };
    Ok(format!("SELECT {} AS id FROM {COMMITS} ORDER BY date DESC LIMIT 1", quote(id)))
}

fn latest_commit(mut rows: Vec<Record>) -> Option<String> {
    rows.pop().and_then(|row| row.get_string("id"))
}

#[async_trait]
impl CommandHandler for Protocol {
    async fn execute(&self, name: &str, args: &[String]) -> cairn_queue::error::Result<Vec<Command>> {
        use cairn_queue::error::ErrorKind as QueueError;

        let operation = name.split_once('.').map_or(name, |(_, op)| op);
        let result = match operation {
            REFRESH => self.refresh().await,
            DOWNLOAD_FILESET => match args {
                [category, location, rest @ ..] => self
                    .download_fileset(category, PathBuf::from(location), rest.first().map(String::as_str))
                    .await
                    .map(|()| Vec::new()),
                _ => exn::bail!(QueueError::Rejected(format!("{name} needs a category and a location"))),
            },
            _ => exn::bail!(QueueError::UnknownCommand(name.to_string())),
        };
        result.map_err(|err| {
            let kind = match err.is_retryable() {
                true => QueueError::Handler(format!("{name} failed")),
                false => QueueError::Rejected(format!("{name} failed")),
            };
            err.raise(kind)
        })
    }
}
