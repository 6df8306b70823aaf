//! The content provider: the composition root owning every authority.
//!
//! There is no global registry. The provider is constructed once with the
//! shared command queue, cache roots and database directory, and hands the
//! same collaborators to every authority it opens.

use crate::auth::CredentialStore;
use crate::authority::Authority;
use crate::cms::{AuthorityOptions, Collaborators, ContentAuthority};
use crate::content::{Content, Params};
use crate::error::{ErrorKind, Result};
use crate::http::HttpClient;
use crate::path::ContentPath;
use cairn_queue::CommandQueue;
use cairn_storage::CacheRoots;
use cairn_store::Database;
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Provider {
    authorities: BTreeMap<String, Arc<dyn Authority>>,
    queue: Arc<CommandQueue>,
    roots: CacheRoots,
    db_dir: PathBuf,
    cancel: CancellationToken,
}

impl Provider {
    pub fn new(queue: Arc<CommandQueue>, roots: CacheRoots, db_dir: impl Into<PathBuf>) -> Self {
        Self { authorities: BTreeMap::new(), queue, roots, db_dir: db_dir.into(), cancel: CancellationToken::new() }
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Cancelled on [`shutdown`](Self::shutdown); stops refresh loops and
    /// in-flight fileset unpacking.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn register(&mut self, authority: Arc<dyn Authority>) {
        self.authorities.insert(authority.name().to_string(), authority);
    }

    /// Open a CMS authority with its own database under the provider's
    /// database directory, and register it.
    pub async fn open_content_authority(
        &mut self,
        options: AuthorityOptions,
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Arc<ContentAuthority>> {
        let path = self.db_dir.join(options.settings.database_name());
        let db = Database::connect(&path).await.or_raise(|| ErrorKind::Store)?;
        let cache = self.roots.for_authority(&options.name);
        let shared = Collaborators { queue: Arc::clone(&self.queue), http, credentials, cancel: self.cancel.child_token() };
        let authority = Arc::new(ContentAuthority::open(options, db, cache, shared).await?);
        self.register(authority.clone());
        Ok(authority)
    }

    pub fn authority(&self, name: &str) -> Result<&Arc<dyn Authority>> {
        self.authorities.get(name).ok_or_raise(|| ErrorKind::NotFound(format!("authority {name}")))
    }

    pub fn authorities(&self) -> impl Iterator<Item = &Arc<dyn Authority>> {
        self.authorities.values()
    }

    /// Resolve a content path on the named authority.
    pub async fn resolve(&self, authority: &str, path: &str, params: &Params, cancel: &CancellationToken) -> Result<Content> {
        self.authority(authority)?.resolve(&ContentPath::parse(path), params, cancel).await
    }

    /// Refresh every authority in turn. Failures are logged and the
    /// remaining authorities still refresh; the first failure is returned.
    pub async fn refresh_all(&self) -> Result<()> {
        let mut first_error = None;
        for authority in self.authorities.values() {
            if let Err(err) = authority.refresh_content().await {
                tracing::warn!(authority = authority.name(), error = %err, "refresh failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Refresh each authority with an interval immediately and then
    /// periodically, until cancelled.
    pub async fn run(&self) {
        let loops = self.authorities.values().filter_map(|authority| {
            let interval = authority.refresh_interval()?;
            let authority = Arc::clone(authority);
            let cancel = self.cancel.clone();
            Some(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(err) = authority.refresh_content().await {
                                tracing::warn!(authority = authority.name(), error = %err, "scheduled refresh failed");
                            }
                        },
                    }
                }
                tracing::debug!(authority = authority.name(), "refresh loop stopped");
            })
        });
        futures::future::join_all(loops).await;
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        name: &'static str,
        refreshes: AtomicUsize,
        interval: Option<Duration>,
        fail: bool,
    }

    impl Counting {
        fn new(name: &'static str, interval: Option<Duration>, fail: bool) -> Arc<Self> {
            Arc::new(Self { name, refreshes: AtomicUsize::new(0), interval, fail })
        }
    }

    #[async_trait]
    impl Authority for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn refresh_interval(&self) -> Option<Duration> {
            self.interval
        }

        async fn resolve(&self, path: &ContentPath, _params: &Params, _cancel: &CancellationToken) -> Result<Content> {
            exn::bail!(ErrorKind::NotFound(path.to_string()))
        }

        async fn refresh_content(&self) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                true => exn::bail!(ErrorKind::Network("offline".to_string())),
                false => Ok(()),
            }
        }
    }

    async fn provider() -> Provider {
        let db = Database::connect_in_memory().await.unwrap();
        let queue = Arc::new(CommandQueue::new(db).await.unwrap());
        Provider::new(queue, CacheRoots::under("/tmp/cairn"), "/tmp/cairn/db")
    }

    #[tokio::test]
    async fn test_unknown_authority() {
        let provider = provider().await;
        let err = provider.resolve("missing", "~posts", &Params::new(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_refresh_all_continues_after_failure() {
        let mut provider = provider().await;
        let failing = Counting::new("a", None, true);
        let working = Counting::new("b", None, false);
        provider.register(failing.clone());
        provider.register(working.clone());
        let err = provider.refresh_all().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        assert_eq!(failing.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(working.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_refreshes_until_cancelled() {
        let mut provider = provider().await;
        tokio::time::pause();
        let periodic = Counting::new("periodic", Some(Duration::from_secs(60)), false);
        let manual = Counting::new("manual", None, false);
        provider.register(periodic.clone());
        provider.register(manual.clone());
        let provider = Arc::new(provider);

        let running = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.run().await }
        });
        tokio::time::sleep(Duration::from_secs(150)).await;
        provider.cancellation().cancel();
        running.await.unwrap();

        assert_eq!(periodic.refreshes.load(Ordering::SeqCst), 3);
        assert_eq!(manual.refreshes.load(Ordering::SeqCst), 0);
    }
}
