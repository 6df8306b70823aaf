//! The CMS content authority.

use crate::auth::{CredentialStore, Credentials};
use crate::authority::{Authority, PathRoots};
use crate::cms::filedb::FileDb;
use crate::cms::fileset::{FilesetConfig, Filesets, standard_filesets};
use crate::cms::protocol::{Protocol, REFRESH};
use crate::cms::repository::{LogoutNotice, LogoutPolicy, Repository};
use crate::cms::roots::{CategoryPathRoot, PostPathRoot};
use crate::cms::schema::{SchemaConfig, build_schema, standard_mappings, standard_tables};
use crate::cms::settings::Settings;
use crate::content::{Content, Params};
use crate::convert::Converters;
use crate::error::{ErrorKind, Result};
use crate::http::{HttpClient, Request, STATUS_OK};
use crate::path::ContentPath;
use async_trait::async_trait;
use cairn_queue::CommandQueue;
use cairn_storage::CacheDirectory;
use cairn_store::{Database, MappingConfig, Value};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Everything configurable about one CMS authority.
#[derive(Clone, Debug)]
pub struct AuthorityOptions {
    pub name: String,
    pub settings: Settings,
    pub schema: SchemaConfig,
    pub mappings: BTreeMap<String, MappingConfig>,
    pub filesets: BTreeMap<String, FilesetConfig>,
    /// Categories served by a [`PostPathRoot`] rather than a plain category root.
    pub post_categories: Vec<String>,
    pub refresh_interval: Option<Duration>,
    pub logout: LogoutPolicy,
}

impl AuthorityOptions {
    /// Options for a standard CMS repository.
    pub fn new(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            settings,
            schema: standard_tables(),
            mappings: standard_mappings(),
            filesets: standard_filesets(),
            post_categories: vec!["posts".to_string(), "pages".to_string()],
            refresh_interval: None,
            logout: LogoutPolicy::default(),
        }
    }
}

/// Collaborators shared by every authority of a provider.
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<CommandQueue>,
    pub http: Arc<dyn HttpClient>,
    pub credentials: Arc<dyn CredentialStore>,
    pub cancel: CancellationToken,
}

pub struct ContentAuthority {
    repo: Arc<Repository>,
    queue: Arc<CommandQueue>,
    roots: PathRoots,
    refresh_interval: Option<Duration>,
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    match valid {
        true => Ok(()),
        false => exn::bail!(ErrorKind::Config(format!("invalid authority name `{name}`"))),
    }
}

impl ContentAuthority {
    /// Open the authority on its database and register its command protocol
    /// with the shared queue.
    pub async fn open(options: AuthorityOptions, db: Database, cache: CacheDirectory, shared: Collaborators) -> Result<Self> {
        check_name(&options.name)?;
        let filesets = Filesets::new(&options.filesets)?;
        let schema = build_schema(&options.schema)?;
        let filedb = FileDb::open(db, schema, &options.mappings, cache, filesets).await?;
        let (notices, _) = broadcast::channel(8);
        let repo = Arc::new(Repository {
            name: options.name.clone(),
            settings: options.settings,
            filedb,
            http: shared.http,
            credentials: shared.credentials,
            converters: Converters::default(),
            logout: options.logout,
            notices,
            cancel: shared.cancel,
        });
        shared.queue.register(options.name.clone(), Arc::new(Protocol::new(Arc::clone(&repo))));

        let mut roots = PathRoots::new();
        for fileset in repo.filedb().filesets().iter() {
            let root = CategoryPathRoot::new(Arc::clone(&repo), fileset.category.clone());
            let segment = format!("~{}", fileset.category);
            match options.post_categories.contains(&fileset.category) {
                true => roots.insert(segment, Arc::new(PostPathRoot::new(root))),
                false => roots.insert(segment, Arc::new(root)),
            }
        }
        tracing::debug!(authority = %options.name, "opened content authority");
        Ok(Self { repo, queue: shared.queue, roots, refresh_interval: options.refresh_interval })
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn refresh_command(&self) -> String {
        format!("{}.{REFRESH}", self.repo.name())
    }

    /// Register credentials and check them against the server.
    ///
    /// On success the content is force-refreshed, since the server may now
    /// send secure content. On any failure the credentials are removed again.
    #[instrument(skip(self, password), fields(authority = %self.repo.name()))]
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.repo.set_credentials(Credentials::new(username, password)).await?;
        let request = Request::new(self.repo.settings().url_for_authentication()).credentials(self.repo.credentials().await?);
        let authenticated = match self.repo.http().post(request).await {
            Ok(response) if response.status == STATUS_OK => {
                response.json().and_then(|body| body.get("authenticated")).and_then(Value::as_bool).unwrap_or(false)
            },
            Ok(response) => {
                tracing::debug!(status = response.status, "authentication rejected");
                false
            },
            Err(err) => {
                self.repo.clear_credentials().await?;
                return Err(err.raise(ErrorKind::Authentication));
            },
        };
        if !authenticated {
            self.repo.clear_credentials().await?;
            exn::bail!(ErrorKind::Authentication);
        }
        tracing::info!(username, "logged in");
        self.force_refresh().await
    }

    /// Forget the credentials and refresh down to public content.
    #[instrument(skip(self), fields(authority = %self.repo.name()))]
    pub async fn logout(&self) -> Result<()> {
        self.repo.clear_credentials().await?;
        tracing::info!("logged out");
        self.force_refresh().await
    }

    pub async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.repo.credentials().await?.is_some())
    }

    /// Discard this authority's pending commands, refresh immediately and drain them.
    pub async fn force_refresh(&self) -> Result<()> {
        self.queue.purge_namespace(self.repo.name()).await.or_raise(|| ErrorKind::Queue)?;
        self.queue.exec_command(&self.refresh_command(), &[]).await.or_raise(|| ErrorKind::Queue)?;
        self.queue.execute_namespace(self.repo.name()).await.or_raise(|| ErrorKind::Queue)?;
        Ok(())
    }

    pub fn subscribe_logout(&self) -> broadcast::Receiver<LogoutNotice> {
        self.repo.subscribe_logout()
    }

    /// Rewrite a path that names a file directly (no `~category` root) into
    /// its id form, `~{category}/${id}.{ext}`.
    async fn rewrite(&self, path: &ContentPath) -> Result<Option<ContentPath>> {
        match path.root() {
            Some(root) if !root.starts_with('~') => {},
            _ => return Ok(None),
        }
        let Some(file) = self.repo.filedb().file_with_path(&path.full_path()).await? else {
            return Ok(None);
        };
        let (Some(id), Some(category)) = (file.get_string("id"), file.get_str("category")) else {
            return Ok(None);
        };
        let rewritten = match path.ext() {
            Some(ext) => format!("~{category}/${id}.{ext}"),
            None => format!("~{category}/${id}"),
        };
        Ok(Some(ContentPath::parse(&rewritten)))
    }
}

#[async_trait]
impl Authority for ContentAuthority {
    fn name(&self) -> &str {
        self.repo.name()
    }

    fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    #[instrument(skip(self, params, cancel), fields(authority = %self.repo.name(), path = %path))]
    async fn resolve(&self, path: &ContentPath, params: &Params, cancel: &CancellationToken) -> Result<Content> {
        match self.rewrite(path).await? {
            Some(rewritten) => self.roots.dispatch(&rewritten, params, cancel).await,
            None => self.roots.dispatch(path, params, cancel).await,
        }
    }

    async fn refresh_content(&self) -> Result<()> {
        let command = cairn_queue::Command::new(self.refresh_command(), Vec::<String>::new());
        self.queue.append(&[command]).await.or_raise(|| ErrorKind::Queue)?;
        self.queue.execute_namespace(self.repo.name()).await.or_raise(|| ErrorKind::Queue)?;
        Ok(())
    }
}
