//! Tables and mappings of a CMS repository's local store.

use crate::error::{ErrorKind, Result};
use cairn_store::{Column, ColumnTag, ColumnType, MappingConfig, Relation, Schema, Table};
use exn::ResultExt;
use std::collections::BTreeMap;

pub const FILES: &str = "files";
pub const POSTS: &str = "posts";
pub const COMMITS: &str = "commits";
pub const META: &str = "meta";
pub const FINGERPRINTS: &str = "fingerprints";

/// Fingerprint row holding the identity of the whole dataset.
pub const GROUP_CATEGORY: &str = "$group";
/// File status marking a row for removal at the end of a refresh.
pub const DELETED_STATUS: &str = "deleted";

/// Table declarations keyed by table name.
pub type SchemaConfig = BTreeMap<String, Vec<Column>>;

/// Columns the sync protocol reads and writes directly.
const REQUIRED: &[(&str, &[&str])] = &[
    (FILES, &["path", "category", "status"]),
    (COMMITS, &["date"]),
    (FINGERPRINTS, &["category", "current", "previous"]),
];

fn string(name: &str) -> Column {
    Column::new(name, ColumnType::String)
}

fn integer(name: &str) -> Column {
    Column::new(name, ColumnType::Integer)
}

/// The protocol tables plus the standard content tables.
pub fn standard_tables() -> SchemaConfig {
    BTreeMap::from([
        (
            FILES.to_string(),
            vec![
                integer("id").tagged(ColumnTag::Id),
                string("path"),
                string("category"),
                string("status"),
                string("commit").tagged(ColumnTag::Version),
            ],
        ),
        (
            POSTS.to_string(),
            vec![
                integer("id").tagged(ColumnTag::Id),
                string("type"),
                string("title"),
                string("body"),
                integer("image"),
                string("commit").tagged(ColumnTag::Version),
            ],
        ),
        (COMMITS.to_string(), vec![string("commit").tagged(ColumnTag::Id), string("date"), string("subject")]),
        (
            META.to_string(),
            vec![
                string("id").tagged(ColumnTag::Id).formatted("{fileid}:{key}"),
                integer("fileid").tagged(ColumnTag::OwnerId),
                string("key").tagged(ColumnTag::Key),
                string("value"),
                string("commit").tagged(ColumnTag::Version),
            ],
        ),
        (FINGERPRINTS.to_string(), vec![string("category").tagged(ColumnTag::Id), string("current"), string("previous")]),
    ])
}

/// The ORM mappings available on the `files` source table.
pub fn standard_mappings() -> BTreeMap<String, MappingConfig> {
    BTreeMap::from([
        ("post".to_string(), MappingConfig::new(Relation::Object, POSTS)),
        ("commit".to_string(), MappingConfig::new(Relation::SharedObject, COMMITS)),
        ("meta".to_string(), MappingConfig::new(Relation::Map, META)),
    ])
}

/// Build a schema from table declarations, checking the protocol tables.
pub fn build_schema(config: &SchemaConfig) -> Result<Schema> {
    let tables = config
        .iter()
        .map(|(name, columns)| Table::new(name.clone(), columns.clone()).or_raise(|| ErrorKind::Config(format!("table {name}"))))
        .collect::<Result<Vec<_>>>()?;
    let schema = Schema::new(tables);
    for (table, columns) in REQUIRED {
        let Ok(declared) = schema.table(table) else {
            exn::bail!(ErrorKind::Config(format!("missing table {table}")));
        };
        if declared.column_for_tag(ColumnTag::Id).is_none() {
            exn::bail!(ErrorKind::Config(format!("table {table} has no id column")));
        }
        if let Some(column) = columns.iter().find(|c| !declared.has_column(c)) {
            exn::bail!(ErrorKind::Config(format!("table {table} has no {column} column")));
        }
    }
    Ok(schema)
}
