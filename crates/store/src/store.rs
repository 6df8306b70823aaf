//! Schema-aware access to one authority's content database.

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::exec;
use crate::record::{Record, ResultSet};
use crate::schema::{ColumnTag, Schema};
use exn::ResultExt;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};
use std::sync::Arc;

/// The local store: a [`Database`] paired with the [`Schema`] it was created from.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    schema: Arc<Schema>,
}

impl Store {
    /// Wrap a database, creating any table of `schema` that is missing.
    pub async fn open(db: Database, schema: Arc<Schema>) -> Result<Self> {
        db.apply_schema(&schema).await?;
        Ok(Self { db, schema })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn column_for_tag(&self, table: &str, tag: ColumnTag) -> Option<&str> {
        self.schema.column_for_tag(table, tag)
    }

    pub async fn perform_query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        exec::fetch_all(self.db.pool(), sql, params).await
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn perform_update(&self, sql: &str, params: &[Value]) -> Result<u64> {
        exec::execute(self.db.pool(), sql, params).await
    }

    pub async fn read(&self, table: &str, id: impl Into<Value>) -> Result<Option<Record>> {
        exec::read(self.db.pool(), self.schema.table(table)?, &id.into()).await
    }

    /// Insert or update a single row, keyed by the table's id column.
    pub async fn upsert(&self, table: &str, record: &Record) -> Result<()> {
        exec::upsert(self.db.pool(), self.schema.table(table)?, record).await
    }

    pub async fn delete(&self, table: &str, id: impl Into<Value>) -> Result<u64> {
        exec::delete(self.db.pool(), self.schema.table(table)?, &id.into()).await
    }

    /// Begin a transaction. Dropping the returned [`StoreTx`] without
    /// committing rolls everything back.
    pub async fn begin(&self) -> Result<StoreTx> {
        let tx = self.db.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(StoreTx { tx, schema: self.schema.clone() })
    }
}

/// An open, all-or-nothing transaction against the store.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
    schema: Arc<Schema>,
}

impl StoreTx {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn perform_query(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        exec::fetch_all(&mut *self.tx, sql, params).await
    }

    pub async fn perform_update(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        exec::execute(&mut *self.tx, sql, params).await
    }

    pub async fn read(&mut self, table: &str, id: impl Into<Value>) -> Result<Option<Record>> {
        exec::read(&mut *self.tx, self.schema.table(table)?, &id.into()).await
    }

    pub async fn upsert(&mut self, table: &str, record: &Record) -> Result<()> {
        exec::upsert(&mut *self.tx, self.schema.table(table)?, record).await
    }

    pub async fn delete(&mut self, table: &str, id: impl Into<Value>) -> Result<u64> {
        exec::delete(&mut *self.tx, self.schema.table(table)?, &id.into()).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.or_raise(|| ErrorKind::Database)
    }
}
