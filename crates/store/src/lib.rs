//! Local content store for cairn.
//!
//! Each authority keeps its replica of the remote content in one SQLite
//! database. Tables are declared at configuration time through a [`Schema`],
//! whose column *tags* let higher layers address columns by role rather than
//! by name. The [`Orm`] reconstructs nested records from a source table and
//! its relation mappings.
//!
//! The same [`Database`] wrapper also backs the provider's command queue.

mod db;
pub mod error;
mod exec;
mod orm;
mod record;
pub mod schema;
mod store;

pub use crate::db::Database;
pub use crate::orm::{Mapping, MappingConfig, Orm, Relation};
pub use crate::record::{Record, ResultSet};
pub use crate::schema::{Column, ColumnTag, ColumnType, Schema, Table};
pub use crate::store::{Store, StoreTx};
pub use serde_json::Value;
