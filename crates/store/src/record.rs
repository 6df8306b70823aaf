//! Dynamic records and their mapping to and from SQLite values.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use std::ops::{Deref, DerefMut};

/// An ordered mapping of field names to values.
///
/// Scalars come straight from table columns; nested records and sequences
/// only appear in records hydrated by the [`Orm`](crate::Orm).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// An ordered sequence of records. Restartable only by re-running the query.
pub type ResultSet = Vec<Record>;

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// String view of a scalar field. Numbers and booleans are stringified.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}
impl Deref for Record {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Bind a dynamic value to a query parameter.
///
/// Nested arrays and objects have no SQLite representation, so they are
/// stored as their JSON text.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(f)) => query.bind(f),
            (None, None) => query.bind(n.to_string()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Decode a result row into a record, keyed by the column labels of the query.
pub(crate) fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let name = column.name();
        let raw = row.try_get_raw(column.ordinal()).or_raise(|| ErrorKind::InvalidValue(name.to_string()))?;
        let value = match raw.is_null() {
            true => Value::Null,
            false => match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => {
                    let i: i64 = row.try_get(column.ordinal()).or_raise(|| ErrorKind::InvalidValue(name.to_string()))?;
                    Value::Number(i.into())
                },
                "REAL" => {
                    let f: f64 = row.try_get(column.ordinal()).or_raise(|| ErrorKind::InvalidValue(name.to_string()))?;
                    Number::from_f64(f).map_or(Value::Null, Value::Number)
                },
                "BLOB" => {
                    let bytes: Vec<u8> =
                        row.try_get(column.ordinal()).or_raise(|| ErrorKind::InvalidValue(name.to_string()))?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                },
                _ => {
                    let s: String = row.try_get(column.ordinal()).or_raise(|| ErrorKind::InvalidValue(name.to_string()))?;
                    Value::String(s)
                },
            },
        };
        record.insert(name.to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        assert!(Record::from_value(json!({"id": 1})).is_some());
        assert!(Record::from_value(json!([1, 2])).is_none());
        assert!(Record::from_value(json!("text")).is_none());
    }

    #[test]
    fn test_get_string_stringifies_scalars() {
        let record = Record::from_value(json!({"id": 42, "title": "Hi", "draft": false, "tags": [], "none": null}))
            .unwrap();
        assert_eq!(record.get_string("id").as_deref(), Some("42"));
        assert_eq!(record.get_string("title").as_deref(), Some("Hi"));
        assert_eq!(record.get_string("draft").as_deref(), Some("false"));
        assert_eq!(record.get_string("tags"), None);
        assert_eq!(record.get_string("none"), None);
        assert_eq!(record.get_string("missing"), None);
    }

    #[test]
    fn test_field_order_is_preserved() {
        let mut record = Record::new();
        record.insert("zeta".into(), json!(1));
        record.insert("alpha".into(), json!(2));
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }
}
