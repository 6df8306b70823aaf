//! Object-relation mapping over the local store.
//!
//! An [`Orm`] is bound to one *source* table and a set of named relation
//! [`Mapping`]s. Queries join the requested mappings onto the source table in
//! a single statement and fold the flat, outer-joined rows back into nested
//! records:
//!
//! - object and shared-object mappings become a nested record under the
//!   mapping's name,
//! - array mappings become a sequence ordered by the target's index column,
//! - map mappings become a record keyed by the target's key column.

mod mapping;
mod prune;
mod select;

pub use self::mapping::{Mapping, MappingConfig, Relation};
use crate::error::{ErrorKind, Result};
use crate::record::{Record, ResultSet};
use crate::schema::{ColumnTag, Schema, quote};
use crate::store::{Store, StoreTx};
use exn::OptionExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct Orm {
    schema: Arc<Schema>,
    source: String,
    source_id: String,
    source_version: Option<String>,
    mappings: BTreeMap<String, Mapping>,
}

impl Orm {
    /// Bind an ORM to `source`, resolving every mapping against `schema`.
    pub fn new(
        schema: Arc<Schema>,
        source: impl Into<String>,
        mappings: &BTreeMap<String, MappingConfig>,
    ) -> Result<Self> {
        let source = source.into();
        let table = schema.table(&source)?;
        let source_id = table.require_tag(ColumnTag::Id)?.to_string();
        let source_version = table.column_for_tag(ColumnTag::Version).map(str::to_string);
        let mappings = mappings
            .iter()
            .map(|(name, config)| Ok((name.clone(), Mapping::resolve(name, config, table, &schema)?)))
            .collect::<Result<_>>()?;
        Ok(Self { schema, source, source_id, source_version, mappings })
    }

    /// Name of the source table.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mapping(&self, name: &str) -> Option<&Mapping> {
        self.mappings.get(name)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    /// Qualified, quoted reference to a source column for use in where clauses.
    pub fn source_column(&self, column: &str) -> Result<String> {
        let table = self.schema.table(&self.source)?;
        if !table.has_column(column) {
            exn::bail!(ErrorKind::UnknownColumn(self.source.clone(), column.to_string()));
        }
        Ok(format!("{}.{}", quote(&self.source), quote(column)))
    }

    fn requested<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&Mapping>> {
        names
            .iter()
            .map(|name| self.mappings.get(name.as_ref()).ok_or_raise(|| ErrorKind::UnknownMapping(name.as_ref().to_string())))
            .collect()
    }

    /// Select source rows matching `predicate`, hydrated with the named mappings.
    ///
    /// The predicate is a SQL boolean expression over the source table (use
    /// [`source_column`](Self::source_column) to reference columns); an empty
    /// predicate selects every row.
    #[instrument(skip(self, store, mappings, params), fields(source = %self.source))]
    pub async fn select_where<S: AsRef<str>>(
        &self,
        store: &Store,
        mappings: &[S],
        predicate: &str,
        params: &[Value],
    ) -> Result<ResultSet> {
        let mappings = self.requested(mappings)?;
        let sql = select::statement(self, &mappings, predicate)?;
        let rows = store.perform_query(&sql, params).await?;
        Ok(select::hydrate(self, &mappings, rows))
    }

    /// Look up one source row by id, hydrated with the named mappings.
    pub async fn select_key<S: AsRef<str>>(
        &self,
        store: &Store,
        key: impl Into<Value>,
        mappings: &[S],
    ) -> Result<Option<Record>> {
        let predicate = format!("{} = ?", self.source_column(&self.source_id)?);
        let mut results = self.select_where(store, mappings, &predicate, &[key.into()]).await?;
        Ok(match results.is_empty() {
            true => None,
            false => Some(results.swap_remove(0)),
        })
    }

    /// Delete a source row and every collection row it owns, atomically.
    #[instrument(skip(self, store, key), fields(source = %self.source))]
    pub async fn delete_key(&self, store: &Store, key: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let mut tx = store.begin().await?;
        match self.delete_key_in(&mut tx, &key).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed delete also failed");
                }
                Err(err)
            },
        }
    }

    async fn delete_key_in(&self, tx: &mut StoreTx, key: &Value) -> Result<()> {
        for mapping in self.mappings.values().filter(|m| m.relation.is_collection()) {
            let Some(owner_id) = &mapping.owner_id else { continue };
            let sql = format!("DELETE FROM {} WHERE {} = ?", quote(&mapping.table), quote(owner_id));
            tx.perform_update(&sql, std::slice::from_ref(key)).await?;
        }
        tx.delete(&self.source, key.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
