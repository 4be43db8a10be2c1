// ABOUTME: LocalStore trait - the capabilities the sync core needs from the destination database
// ABOUTME: Implemented for PostgreSQL in crate::postgres and by in-memory fakes in tests

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::reload::BulkLoad;
use super::upsert::UpsertStatement;

/// A column of the local table as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Type tag, e.g. `timestamptz`, `varchar`, `int4`
    pub type_tag: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// Destination database used by one sync run.
///
/// A store is used by one caller at a time; write methods take `&mut self`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Columns of `table` in declaration order. Empty when the table does not exist.
    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Maximum value of a timestamp column, `None` when the table is empty.
    async fn max_timestamp(&self, table: &str, column: &str) -> Result<Option<DateTime<Utc>>>;

    /// Insert the row, or overwrite every mapped column when the key already exists.
    ///
    /// The write is committed before this returns.
    async fn upsert_row(&mut self, statement: &UpsertStatement, row: &[Value]) -> Result<u64>;

    /// Replace the whole table content with the CSV `payload` (header line first).
    ///
    /// Deleting the old rows and loading the new ones commit together or not at all.
    /// Returns the number of rows loaded.
    async fn replace_all(&mut self, load: &BulkLoad, payload: Vec<Bytes>) -> Result<u64>;
}
