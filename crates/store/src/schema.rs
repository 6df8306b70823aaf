//! Table-schema registry.
//!
//! Tables are declared once at configuration time. Each table maps logical
//! column roles ([`ColumnTag`]) to concrete column names, so the ORM and the
//! sync protocol can address "the id column" or "the version column" of any
//! table without hardcoding names. The tag map is resolved when the [`Table`]
//! is constructed and never changes afterwards.

use crate::Record;
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Primitive storage type of a column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    #[default]
    #[serde(alias = "text")]
    String,
    Real,
}
impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::String => "TEXT",
            Self::Real => "REAL",
        }
    }
}

/// Logical role of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnTag {
    /// Primary key of the row.
    Id,
    /// Commit/version marker shared between a parent and its related rows.
    Version,
    /// Id of the owning source row (collection relations).
    #[serde(alias = "owner-id")]
    OwnerId,
    /// Key of a dictionary entry.
    Key,
    /// Position of a list entry.
    Index,
}
impl ColumnTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Version => "version",
            Self::OwnerId => "ownerid",
            Self::Key => "key",
            Self::Index => "index",
        }
    }
}
impl Display for ColumnTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<ColumnTag>,
    /// Template for synthesising the value from sibling columns, e.g. `{fileid}:{key}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}
impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty, tag: None, format: None }
    }

    pub fn tagged(mut self, tag: ColumnTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn formatted(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// A named table with an ordered column list and its resolved tag map.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    tags: HashMap<ColumnTag, usize>,
}
impl Table {
    /// Declare a table.
    ///
    /// Names are restricted to ASCII letters, digits and underscores because
    /// they are interpolated into generated SQL. Each tag may be claimed by at
    /// most one column.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        check_identifier(&name)?;
        if columns.is_empty() {
            exn::bail!(ErrorKind::Schema(format!("table {name} has no columns")));
        }
        let mut tags = HashMap::new();
        for (position, column) in columns.iter().enumerate() {
            check_identifier(&column.name)?;
            if columns[..position].iter().any(|c| c.name == column.name) {
                exn::bail!(ErrorKind::Schema(format!("duplicate column {name}.{}", column.name)));
            }
            if let Some(tag) = column.tag
                && tags.insert(tag, position).is_some()
            {
                exn::bail!(ErrorKind::Schema(format!("table {name} tags more than one column as `{tag}`")));
            }
        }
        Ok(Self { name, columns, tags })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Name of the column carrying `tag`, if any.
    pub fn column_for_tag(&self, tag: ColumnTag) -> Option<&str> {
        self.tags.get(&tag).map(|&i| self.columns[i].name.as_str())
    }

    /// Like [`column_for_tag`](Self::column_for_tag), but a missing tag is an error.
    pub fn require_tag(&self, tag: ColumnTag) -> Result<&str> {
        match self.column_for_tag(tag) {
            Some(column) => Ok(column),
            None => exn::bail!(ErrorKind::MissingTag(self.name.clone(), tag.as_str())),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    ///
    /// The id-tagged column, when present, becomes the primary key.
    pub fn create_sql(&self) -> String {
        let id = self.column_for_tag(ColumnTag::Id);
        let columns = self
            .columns
            .iter()
            .map(|c| match Some(c.name.as_str()) == id {
                true => format!("{} {} PRIMARY KEY", quote(&c.name), c.ty.sql()),
                false => format!("{} {}", quote(&c.name), c.ty.sql()),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({columns})", quote(&self.name))
    }

    /// Fill in any formatted column missing from `record`.
    ///
    /// A template is only rendered when every placeholder it references has a
    /// non-null value in the record.
    pub fn apply_formats(&self, record: &mut Record) {
        for column in &self.columns {
            let Some(template) = &column.format else { continue };
            if record.get(&column.name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if let Some(value) = render_format(template, record) {
                record.insert(column.name.clone(), Value::String(value));
            }
        }
    }
}

/// Replace `{column}` placeholders in `template` with values from `record`.
pub(crate) fn render_format(template: &str, record: &Record) -> Option<String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let end = rest[start..].find('}')? + start;
        let value = match record.get(&rest[start + 1..end])? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        output.push_str(&value);
        rest = &rest[end + 1..];
    }
    output.push_str(rest);
    Some(output)
}

/// Quote an identifier for interpolation into SQL.
///
/// Column names such as `commit` and `index` are SQLite keywords, so every
/// generated statement quotes its identifiers. Identifiers are validated on
/// declaration, which keeps the quoting trivial.
pub fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    match valid {
        true => Ok(()),
        false => exn::bail!(ErrorKind::Schema(format!("invalid identifier `{name}`"))),
    }
}

/// The full set of tables of one authority's store.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
}
impl Schema {
    pub fn new(tables: impl IntoIterator<Item = Table>) -> Self {
        Self { tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect() }
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_raise(|| ErrorKind::UnknownTable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn column_for_tag(&self, table: &str, tag: ColumnTag) -> Option<&str> {
        self.tables.get(table).and_then(|t| t.column_for_tag(tag))
    }
}
