//! The persisted command queue.

use crate::command::{Command, QueueRow, QueuedCommand, namespace};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use cairn_store::Database;
use exn::ResultExt;
use sqlx::SqliteExecutor;
use std::collections::HashMap;
use std::path::Path;
use futures::future::join_all;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// Failed executions tolerated before a command is dropped from the queue.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Executes the commands of one namespace.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command, returning its follow-on commands in execution order.
    async fn execute(&self, name: &str, args: &[String]) -> Result<Vec<Command>>;
}

/// A durable FIFO of named commands, ordered by priority band.
///
/// Each namespace (one per authority) drains through its own gate, so
/// commands of one namespace run strictly one at a time while a slow
/// command never holds up another namespace. When a command succeeds, its
/// removal and the insertion of its follow-ons are committed in a single
/// transaction, so after a crash either both are visible or neither is.
pub struct CommandQueue {
    db: Database,
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    gates: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    max_attempts: i64,
}

fn now() -> i64 {
    time::UtcDateTime::now().unix_timestamp()
}

async fn insert<'c, E>(executor: E, command: &Command, seq: Option<i64>) -> Result<()>
where
    E: SqliteExecutor<'c>,
{
    let args = serde_json::to_string(&command.args).or_raise(|| ErrorKind::Handler("unserialisable arguments".into()))?;
    let query = match seq {
        None => sqlx::query(include_str!("../queries/append.sql"))
            .bind(&command.name)
            .bind(args)
            .bind(command.priority)
            .bind(now()),
        Some(seq) => sqlx::query(include_str!("../queries/append_follow_on.sql"))
            .bind(&command.name)
            .bind(args)
            .bind(command.priority)
            .bind(seq)
            .bind(now()),
    };
    query.execute(executor).await.or_raise(|| ErrorKind::Database)?;
    Ok(())
}

impl CommandQueue {
    /// Open (or create) the queue database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::connect(path).await.or_raise(|| ErrorKind::Database)?;
        Self::new(db).await
    }

    /// Wrap an existing database, running the queue migrations on it.
    pub async fn new(db: Database) -> Result<Self> {
        db.migrate(&MIGRATOR).await.or_raise(|| ErrorKind::Database)?;
        Ok(Self {
            db,
            handlers: RwLock::new(HashMap::new()),
            gates: StdMutex::new(HashMap::new()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Route every command in `namespace` to `handler`, replacing any previous handler.
    pub fn register(&self, namespace: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.insert(namespace.into(), handler);
    }

    fn handler_for(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(namespace(name)).cloned()
    }

    fn gate(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry(namespace.to_string()).or_default().clone()
    }

    /// Persist commands at the back of the queue, in order.
    pub async fn append(&self, commands: &[Command]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        for command in commands {
            insert(&mut *tx, command, None).await?;
            tracing::debug!(command = %command, "queued command");
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Every queued command, in execution order.
    pub async fn pending(&self) -> Result<Vec<QueuedCommand>> {
        let rows: Vec<QueueRow> = sqlx::query_as(include_str!("../queries/pending.sql"))
            .fetch_all(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn next_in(&self, namespace: &str) -> Result<Option<QueueRow>> {
        sqlx::query_as(include_str!("../queries/next_in_namespace.sql"))
            .bind(namespace)
            .fetch_optional(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Drain every namespace with pending commands, returning how many commands completed.
    ///
    /// Namespaces drain concurrently. A failure stops only its own
    /// namespace; the first failure is returned once every namespace has
    /// finished.
    #[instrument(skip(self))]
    pub async fn execute_queue(&self) -> Result<usize> {
        let mut namespaces: Vec<String> = Vec::new();
        for item in self.pending().await? {
            let ns = item.command.namespace();
            if !namespaces.iter().any(|seen| seen == ns) {
                namespaces.push(ns.to_string());
            }
        }
        let mut completed = 0;
        let mut failure = None;
        for result in join_all(namespaces.iter().map(|ns| self.execute_namespace(ns))).await {
            match result {
                Ok(count) => completed += count,
                Err(err) if failure.is_none() => failure = Some(err),
                Err(err) => tracing::warn!(error = ?err, "command failed"),
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(completed),
        }
    }

    /// Drain one namespace, returning how many commands completed.
    ///
    /// Stops at the first failing command; that command stays queued (with
    /// its attempt counter raised) until it exhausts its attempts, unless
    /// its handler reported the failure as not worth retrying.
    #[instrument(skip(self))]
    pub async fn execute_namespace(&self, namespace: &str) -> Result<usize> {
        let gate = self.gate(namespace);
        let _gate = gate.lock().await;
        let mut completed = 0;
        while let Some(row) = self.next_in(namespace).await? {
            let id = row.id;
            let item = match QueuedCommand::try_from(row) {
                Ok(item) => item,
                Err(err) => {
                    tracing::warn!(id, error = %err, "dropping undecodable command");
                    self.remove(id).await?;
                    continue;
                },
            };
            if self.run(&item).await? {
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Execute one queued command. Returns `false` if it was dropped unexecuted.
    async fn run(&self, item: &QueuedCommand) -> Result<bool> {
        let name = &item.command.name;
        let Some(handler) = self.handler_for(name) else {
            tracing::warn!(command = %name, "no handler registered; dropping command");
            self.remove(item.id).await?;
            return Ok(false);
        };
        tracing::debug!(command = %item.command, attempt = item.attempts + 1, "executing command");
        match handler.execute(name, &item.command.args).await {
            Ok(follow_ons) => {
                self.complete(item, &follow_ons).await?;
                Ok(true)
            },
            Err(err) if err.is_retryable() => {
                self.record_failure(item).await?;
                Err(err.raise(ErrorKind::Failed(name.clone())))
            },
            Err(err) => {
                tracing::warn!(command = %item.command, error = %*err, "command rejected; dropping");
                self.remove(item.id).await?;
                Err(err.raise(ErrorKind::Failed(name.clone())))
            },
        }
    }

    async fn complete(&self, item: &QueuedCommand, follow_ons: &[Command]) -> Result<()> {
        let mut tx = self.db.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/remove.sql"))
            .bind(item.id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for command in follow_ons {
            insert(&mut *tx, command, Some(item.seq)).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        if !follow_ons.is_empty() {
            tracing::debug!(command = %item.command.name, follow_ons = follow_ons.len(), "queued follow-on commands");
        }
        Ok(())
    }

    async fn record_failure(&self, item: &QueuedCommand) -> Result<()> {
        if item.attempts + 1 >= self.max_attempts {
            tracing::warn!(command = %item.command, attempts = item.attempts + 1, "command failed too often; dropping");
            return self.remove(item.id).await;
        }
        sqlx::query(include_str!("../queries/record_failure.sql"))
            .bind(item.id)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query(include_str!("../queries/remove.sql"))
            .bind(id)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Run a command immediately, without queueing the command itself.
    ///
    /// Its follow-ons are appended to the queue (not executed) and also
    /// returned.
    #[instrument(skip(self, args))]
    pub async fn exec_command(&self, name: &str, args: &[String]) -> Result<Vec<Command>> {
        let gate = self.gate(namespace(name));
        let _gate = gate.lock().await;
        let Some(handler) = self.handler_for(name) else {
            exn::bail!(ErrorKind::UnknownCommand(name.to_string()));
        };
        let follow_ons = handler.execute(name, args).await.map_err(|err| err.raise(ErrorKind::Failed(name.to_string())))?;
        self.append(&follow_ons).await?;
        Ok(follow_ons)
    }

    /// Drop every queued command without executing it.
    pub async fn purge_queue(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/purge.sql"))
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() > 0 {
            tracing::info!(purged = result.rows_affected(), "purged command queue");
        }
        Ok(result.rows_affected())
    }

    /// Drop the queued commands of one namespace, waiting for any command
    /// of that namespace already running.
    pub async fn purge_namespace(&self, namespace: &str) -> Result<u64> {
        let gate = self.gate(namespace);
        let _gate = gate.lock().await;
        let result = sqlx::query(include_str!("../queries/purge_namespace.sql"))
            .bind(namespace)
            .execute(self.db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() > 0 {
            tracing::info!(namespace, purged = result.rows_affected(), "purged queued commands");
        }
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
