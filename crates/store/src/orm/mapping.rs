use crate::error::{ErrorKind, Result};
use crate::schema::{ColumnTag, Schema, Table, check_identifier};
use serde::{Deserialize, Serialize};

/// How a mapping's target rows relate to a source row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    /// One row, joined on `target.id = source.id`.
    #[serde(alias = "property")]
    Object,
    /// One row, joined on `target.id = source.{mapping name}`.
    #[serde(alias = "shared-property")]
    SharedObject,
    /// Zero or more rows carrying a key column, joined on `target.ownerid = source.id`.
    /// Hydrated as an array ordered by key; rows sharing a key are all kept.
    #[serde(alias = "dictionary")]
    Map,
    /// Zero or more rows ordered by the target's index column, joined on `target.ownerid = source.id`.
    #[serde(alias = "list")]
    Array,
}
impl Relation {
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Map | Self::Array)
    }

    /// Whether the target rows belong to a single source row (and so share its version).
    pub fn is_owned(&self) -> bool {
        !matches!(self, Self::SharedObject)
    }
}

/// Declared configuration of one mapping. Column names left unset are
/// resolved from the target table's tags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub relation: Relation,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownerid_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_column: Option<String>,
}
impl MappingConfig {
    pub fn new(relation: Relation, table: impl Into<String>) -> Self {
        Self {
            relation,
            table: table.into(),
            id_column: None,
            ownerid_column: None,
            key_column: None,
            index_column: None,
            version_column: None,
        }
    }
}

/// A mapping with every column name resolved against the schema.
#[derive(Clone, Debug)]
pub struct Mapping {
    pub name: String,
    pub relation: Relation,
    pub table: String,
    pub id: String,
    pub owner_id: Option<String>,
    pub key: Option<String>,
    pub index: Option<String>,
    pub version: Option<String>,
}
impl Mapping {
    pub(crate) fn resolve(name: &str, config: &MappingConfig, source: &Table, schema: &Schema) -> Result<Self> {
        check_identifier(name)?;
        let target = schema.table(&config.table)?;
        let column = |explicit: &Option<String>, tag: ColumnTag| -> Result<Option<String>> {
            match explicit {
                Some(column) if target.has_column(column) => Ok(Some(column.clone())),
                Some(column) => exn::bail!(ErrorKind::UnknownColumn(target.name().to_string(), column.clone())),
                None => Ok(target.column_for_tag(tag).map(str::to_string)),
            }
        };
        let id = column(&config.id_column, ColumnTag::Id)?;
        let Some(id) = id else {
            exn::bail!(ErrorKind::MissingTag(target.name().to_string(), ColumnTag::Id.as_str()));
        };
        let owner_id = column(&config.ownerid_column, ColumnTag::OwnerId)?;
        if config.relation.is_collection() && owner_id.is_none() {
            exn::bail!(ErrorKind::MissingTag(target.name().to_string(), ColumnTag::OwnerId.as_str()));
        }
        if config.relation == Relation::SharedObject && !source.has_column(name) {
            exn::bail!(ErrorKind::Schema(format!(
                "shared mapping `{name}` needs a `{name}` column on {}",
                source.name()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            relation: config.relation,
            table: target.name().to_string(),
            id,
            owner_id,
            key: column(&config.key_column, ColumnTag::Key)?,
            index: column(&config.index_column, ColumnTag::Index)?,
            version: column(&config.version_column, ColumnTag::Version)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("object", Relation::Object)]
    #[case("property", Relation::Object)]
    #[case("shared-object", Relation::SharedObject)]
    #[case("shared-property", Relation::SharedObject)]
    #[case("map", Relation::Map)]
    #[case("dictionary", Relation::Map)]
    #[case("array", Relation::Array)]
    #[case("list", Relation::Array)]
    fn test_relation_names(#[case] name: &str, #[case] expected: Relation) {
        let relation: Relation = serde_json::from_value(serde_json::Value::String(name.into())).unwrap();
        assert_eq!(relation, expected);
    }

    #[test]
    fn test_unknown_relation_rejected() {
        assert!(serde_json::from_str::<Relation>(r#""graph""#).is_err());
    }
}
