use super::{Mapping, Orm, Relation};
use crate::error::Result;
use crate::record::{Record, ResultSet};
use crate::schema::quote;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Compose the single joined SELECT for a query.
pub(super) fn statement(orm: &Orm, mappings: &[&Mapping], predicate: &str) -> Result<String> {
    let source = orm.schema.table(&orm.source)?;
    let src = quote(&orm.source);
    let mut columns = source
        .columns()
        .iter()
        .map(|c| format!("{src}.{} AS {}", quote(&c.name), quote(&format!("{}.{}", orm.source, c.name))))
        .collect::<Vec<_>>();
    let mut joins = Vec::with_capacity(mappings.len());
    let mut order = vec![format!("{src}.{}", quote(&orm.source_id))];
    for mapping in mappings {
        let target = orm.schema.table(&mapping.table)?;
        let alias = quote(&mapping.name);
        columns.extend(
            target
                .columns()
                .iter()
                .map(|c| format!("{alias}.{} AS {}", quote(&c.name), quote(&format!("{}.{}", mapping.name, c.name)))),
        );
        let on = match (mapping.relation, &mapping.owner_id) {
            (Relation::Object, _) => format!("{alias}.{} = {src}.{}", quote(&mapping.id), quote(&orm.source_id)),
            (Relation::SharedObject, _) => format!("{alias}.{} = {src}.{}", quote(&mapping.id), quote(&mapping.name)),
            (Relation::Map | Relation::Array, Some(owner)) => {
                format!("{alias}.{} = {src}.{}", quote(owner), quote(&orm.source_id))
            },
            // Resolution guarantees collections have an owner column.
            (Relation::Map | Relation::Array, None) => "0".to_string(),
        };
        joins.push(format!("LEFT OUTER JOIN {} AS {alias} ON {on}", quote(&mapping.table)));
        let position = match mapping.relation {
            Relation::Array => mapping.index.as_ref(),
            Relation::Map => mapping.key.as_ref(),
            Relation::Object | Relation::SharedObject => None,
        };
        if let Some(position) = position {
            order.push(format!("{alias}.{}", quote(position)));
        }
    }
    let mut sql = format!("SELECT {} FROM {src}", columns.join(", "));
    for join in joins {
        sql.push(' ');
        sql.push_str(&join);
    }
    if !predicate.trim().is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));
    Ok(sql)
}

/// Split a flat row into per-alias sub-records, dropping nulls.
fn split(row: Record) -> HashMap<String, Map<String, Value>> {
    let mut groups: HashMap<String, Map<String, Value>> = HashMap::new();
    for (label, value) in row.into_inner() {
        if value.is_null() {
            continue;
        }
        let Some((alias, column)) = label.split_once('.') else { continue };
        groups.entry(alias.to_string()).or_default().insert(column.to_string(), value);
    }
    groups
}

fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct Building {
    id: Value,
    record: Record,
    seen: HashMap<String, HashSet<String>>,
}

/// Fold the ordered, outer-joined rows back into nested records.
///
/// Rows are ordered by source id, so a change of id starts a new object.
/// Both kinds of collection become arrays with one item per target row.
/// Items are de-duplicated by target id: with more than one collection
/// joined, each target row appears once per row of the other collection.
pub(super) fn hydrate(orm: &Orm, mappings: &[&Mapping], rows: ResultSet) -> ResultSet {
    let id_label = format!("{}.{}", orm.source, orm.source_id);
    let mut results = Vec::new();
    let mut current: Option<Building> = None;
    for row in rows {
        let id = row.get(&id_label).cloned().unwrap_or(Value::Null);
        let mut groups = split(row);
        if current.as_ref().is_none_or(|c| c.id != id) {
            results.extend(current.take().map(|c| c.record));
            let mut record: Record = groups.remove(&orm.source).unwrap_or_default().into();
            for mapping in mappings {
                match mapping.relation {
                    Relation::Object | Relation::SharedObject => {
                        // A matched join replaces any scalar of the same
                        // name, e.g. the foreign key of a shared mapping.
                        if let Some(values) = groups.get(&mapping.name) {
                            record.insert(mapping.name.clone(), Value::Object(values.clone()));
                        }
                    },
                    Relation::Map | Relation::Array => {
                        record.insert(mapping.name.clone(), Value::Array(Vec::new()));
                    },
                }
            }
            current = Some(Building { id, record, seen: HashMap::new() });
        }
        let Some(building) = current.as_mut() else { continue };
        for mapping in mappings.iter().filter(|m| m.relation.is_collection()) {
            let Some(values) = groups.remove(&mapping.name) else { continue };
            let Some(target_id) = values.get(&mapping.id).map(key_string) else { continue };
            if !building.seen.entry(mapping.name.clone()).or_default().insert(target_id.clone()) {
                continue;
            }
            if let Some(Value::Array(items)) = building.record.get_mut(&mapping.name) {
                items.push(Value::Object(values));
            }
        }
    }
    results.extend(current.map(|c| c.record));
    results
}
