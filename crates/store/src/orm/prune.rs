use super::{Mapping, Orm, Relation};
use crate::error::Result;
use crate::schema::quote;
use crate::store::StoreTx;
use tracing::instrument;

impl Orm {
    /// Remove related rows that no live source row reaches, or whose version
    /// no longer matches their parent's.
    ///
    /// Only mappings with a version column on both the source and the target
    /// take part. Runs inside the caller's transaction so the delta and its
    /// pruning become visible together. Returns the number of deleted rows.
    #[instrument(skip_all, fields(source = %self.source))]
    pub async fn prune_related(&self, tx: &mut StoreTx) -> Result<u64> {
        let Some(source_version) = &self.source_version else {
            return Ok(0);
        };
        let mut deleted = 0;
        for mapping in self.mappings.values() {
            let Some(target_version) = &mapping.version else { continue };
            for sql in self.prune_statements(mapping, source_version, target_version) {
                deleted += tx.perform_update(&sql, &[]).await?;
            }
        }
        if deleted > 0 {
            tracing::debug!(deleted, "pruned related rows");
        }
        Ok(deleted)
    }

    fn prune_statements(&self, mapping: &Mapping, source_version: &str, target_version: &str) -> Vec<String> {
        let src = quote(&self.source);
        let src_id = quote(&self.source_id);
        let tgt = quote(&mapping.table);
        let tgt_id = quote(&mapping.id);
        // Column of the target that points at its parent source row.
        let parent_key = match (mapping.relation, &mapping.owner_id) {
            (Relation::SharedObject, _) => {
                let reference = quote(&mapping.name);
                return vec![format!(
                    "DELETE FROM {tgt} WHERE {tgt_id} NOT IN \
                     (SELECT {src}.{reference} FROM {src} WHERE {src}.{reference} IS NOT NULL)"
                )];
            },
            (Relation::Object, _) => tgt_id.clone(),
            (Relation::Map | Relation::Array, Some(owner)) => quote(owner),
            (Relation::Map | Relation::Array, None) => return Vec::new(),
        };
        vec![
            format!("DELETE FROM {tgt} WHERE {parent_key} NOT IN (SELECT {src_id} FROM {src})"),
            format!(
                "DELETE FROM {tgt} WHERE {tgt_id} IN \
                 (SELECT {tgt}.{tgt_id} FROM {tgt} INNER JOIN {src} ON {src}.{src_id} = {tgt}.{parent_key} \
                 WHERE {tgt}.{} IS NOT {src}.{})",
                quote(target_version),
                quote(source_version)
            ),
        ]
    }
}
