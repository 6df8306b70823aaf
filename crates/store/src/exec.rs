//! Statement execution shared by pooled and transactional access.

use crate::error::{ErrorKind, Result};
use crate::record::{Record, ResultSet, bind_value, record_from_row};
use crate::schema::{ColumnTag, Table, quote};
use exn::ResultExt;
use serde_json::Value;
use sqlx::SqliteExecutor;

pub(crate) async fn fetch_all<'c, E>(executor: E, sql: &str, params: &[Value]) -> Result<ResultSet>
where
    E: SqliteExecutor<'c>,
{
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    let rows = query.fetch_all(executor).await.or_raise(|| ErrorKind::Database)?;
    rows.iter().map(record_from_row).collect()
}

pub(crate) async fn execute<'c, E>(executor: E, sql: &str, params: &[Value]) -> Result<u64>
where
    E: SqliteExecutor<'c>,
{
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    let result = query.execute(executor).await.or_raise(|| ErrorKind::Database)?;
    Ok(result.rows_affected())
}

/// Build the keyed upsert statement for `record`.
///
/// Only columns present in both the record and the table are written; on
/// conflict only those columns are updated, so partial rows (e.g. a
/// fingerprint row carrying only `current`) leave other columns untouched.
pub(crate) fn upsert_statement(table: &Table, record: &Record) -> Result<(String, Vec<Value>)> {
    let id = table.require_tag(ColumnTag::Id)?;
    if record.get(id).is_none_or(Value::is_null) {
        exn::bail!(ErrorKind::InvalidValue(format!("{}.{id}", table.name())));
    }
    let (columns, values): (Vec<_>, Vec<_>) = table
        .columns()
        .iter()
        .filter_map(|c| record.get(&c.name).map(|v| (c.name.as_str(), v.clone())))
        .unzip();
    let names = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .filter(|&&c| c != id)
        .map(|c| format!("{0} = excluded.{0}", quote(c)))
        .collect::<Vec<_>>();
    let conflict = match updates.is_empty() {
        true => "DO NOTHING".to_string(),
        false => format!("DO UPDATE SET {}", updates.join(", ")),
    };
    let sql = format!(
        "INSERT INTO {} ({names}) VALUES ({placeholders}) ON CONFLICT({}) {conflict}",
        quote(table.name()),
        quote(id)
    );
    Ok((sql, values))
}

pub(crate) async fn upsert<'c, E>(executor: E, table: &Table, record: &Record) -> Result<()>
where
    E: SqliteExecutor<'c>,
{
    let mut record = record.clone();
    table.apply_formats(&mut record);
    let (sql, values) = upsert_statement(table, &record)?;
    execute(executor, &sql, &values).await?;
    Ok(())
}

pub(crate) async fn read<'c, E>(executor: E, table: &Table, id: &Value) -> Result<Option<Record>>
where
    E: SqliteExecutor<'c>,
{
    let column = table.require_tag(ColumnTag::Id)?;
    let sql = format!("SELECT * FROM {} WHERE {} = ?", quote(table.name()), quote(column));
    let mut rows = fetch_all(executor, &sql, std::slice::from_ref(id)).await?;
    Ok(match rows.is_empty() {
        true => None,
        false => Some(rows.swap_remove(0)),
    })
}

pub(crate) async fn delete<'c, E>(executor: E, table: &Table, id: &Value) -> Result<u64>
where
    E: SqliteExecutor<'c>,
{
    let column = table.require_tag(ColumnTag::Id)?;
    let sql = format!("DELETE FROM {} WHERE {} = ?", quote(table.name()), quote(column));
    execute(executor, &sql, std::slice::from_ref(id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use serde_json::json;

    fn fingerprints() -> Table {
        Table::new(
            "fingerprints",
            vec![
                Column::new("category", ColumnType::String).tagged(ColumnTag::Id),
                Column::new("current", ColumnType::String),
                Column::new("previous", ColumnType::String),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_upsert_statement_only_touches_provided_columns() {
        let record = Record::from_value(json!({"category": "posts", "current": "c3", "unknown": 1})).unwrap();
        let (sql, values) = upsert_statement(&fingerprints(), &record).unwrap();
        assert_eq!(
            sql,
            r#"INSERT INTO "fingerprints" ("category", "current") VALUES (?, ?) ON CONFLICT("category") DO UPDATE SET "current" = excluded."current""#
        );
        assert_eq!(values, vec![json!("posts"), json!("c3")]);
    }

    #[test]
    fn test_upsert_statement_with_only_id() {
        let record = Record::from_value(json!({"category": "posts"})).unwrap();
        let (sql, _) = upsert_statement(&fingerprints(), &record).unwrap();
        assert!(sql.ends_with("DO NOTHING"));
    }

    #[test]
    fn test_upsert_statement_requires_id() {
        let record = Record::from_value(json!({"current": "c3"})).unwrap();
        assert!(upsert_statement(&fingerprints(), &record).is_err());
        let record = Record::from_value(json!({"category": null})).unwrap();
        assert!(upsert_statement(&fingerprints(), &record).is_err());
    }
}
