use crate::error::{ErrorKind, Result};
use cairn_queue::DEFAULT_MAX_ATTEMPTS;
use cairn_storage::CacheRoots;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const QUEUE_DATABASE: &str = "cairn.commandqueue.sqlite";
const CREDENTIALS_FILE: &str = "credentials.json";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "cairn")
}

/// Where the provider keeps its databases and caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base of the content, app, packaged and staging cache roots.
    pub cache_dir: PathBuf,
    /// Directory holding one database per authority.
    pub db_dir: PathBuf,
    /// Command queue database. Defaults to a file in `db_dir`.
    pub queue_db: Option<PathBuf>,
    /// Attempts before a failing command is dropped.
    pub max_attempts: i64,
    /// Credential file. Defaults to a file in `db_dir`.
    pub credentials: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let (cache_dir, db_dir) = match project_dirs() {
            Some(dirs) => (dirs.cache_dir().to_path_buf(), dirs.data_dir().to_path_buf()),
            None => (PathBuf::from(".cairn/cache"), PathBuf::from(".cairn/data")),
        };
        Self { cache_dir, db_dir, queue_db: None, max_attempts: DEFAULT_MAX_ATTEMPTS, credentials: None }
    }
}

impl ProviderConfig {
    pub fn cache_roots(&self) -> CacheRoots {
        CacheRoots::under(&self.cache_dir)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.queue_db.clone().unwrap_or_else(|| self.db_dir.join(QUEUE_DATABASE))
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials.clone().unwrap_or_else(|| self.db_dir.join(CREDENTIALS_FILE))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            exn::bail!(ErrorKind::Invalid("provider.max_attempts".to_string()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("provider.cache_dir".to_string()));
        }
        if self.db_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("provider.db_dir".to_string()));
        }
        Ok(())
    }
}
