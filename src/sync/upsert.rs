// ABOUTME: Incremental Upserter - pages through the remote delta and upserts it row by row
// ABOUTME: Uses INSERT ... ON CONFLICT DO UPDATE so re-applying a record is harmless

use serde_json::Value;

use super::mapper::ColumnLayout;
use super::store::LocalStore;
use crate::error::{SyncError, SyncResult};
use crate::remote::{QueryPage, RemoteQuery, RemoteRecord};
use crate::utils::{quote_ident, quote_qualified};

/// A single-row "insert, or overwrite on key conflict" statement for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertStatement {
    pub table: String,
    /// (column name, type tag) in row order
    pub columns: Vec<(String, String)>,
    pub key_column: String,
}

impl UpsertStatement {
    pub fn for_layout(layout: &ColumnLayout) -> Self {
        Self {
            table: layout.table.clone(),
            columns: layout
                .columns
                .iter()
                .map(|c| (c.local.clone(), c.type_tag.clone()))
                .collect(),
            key_column: layout.id_column.clone(),
        }
    }

    /// Render the statement.
    ///
    /// Every parameter is bound as text and cast to the column type, so values
    /// arriving as JSON strings, numbers or booleans load into any column type
    /// PostgreSQL can parse them into. Generates a query like:
    /// ```sql
    /// INSERT INTO "leads" ("id", "email")
    /// VALUES ($1::text::"varchar", $2::text::"text")
    /// ON CONFLICT ("id") DO UPDATE SET "email" = EXCLUDED."email"
    /// ```
    pub fn to_sql(&self) -> String {
        let quoted_columns: Vec<String> =
            self.columns.iter().map(|(name, _)| quote_ident(name)).collect();

        let placeholders: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, (_, type_tag))| format!("${}::text::{}", i + 1, quote_ident(type_tag)))
            .collect();

        let update_columns: Vec<String> = self
            .columns
            .iter()
            .filter(|(name, _)| *name != self.key_column)
            .map(|(name, _)| format!("{} = EXCLUDED.{}", quote_ident(name), quote_ident(name)))
            .collect();

        let update_clause = if update_columns.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", update_columns.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            quote_qualified(&self.table),
            quoted_columns.join(", "),
            placeholders.join(", "),
            quote_ident(&self.key_column),
            update_clause
        )
    }
}

/// Textual form of a value as bound to a statement or written to CSV.
///
/// `None` is SQL NULL. Nested objects and arrays are written as JSON text.
pub fn sql_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Counts from an incremental run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub pages: usize,
    pub rows_fetched: usize,
    pub rows_written: u64,
}

/// Fetch every page after `first_page`, one after the other.
pub async fn collect_pages<R>(remote: &R, first_page: QueryPage) -> SyncResult<(Vec<RemoteRecord>, usize)>
where
    R: RemoteQuery + ?Sized,
{
    let mut pages = 1;
    let mut done = first_page.done;
    let mut next = first_page.next_records_url;
    let mut records = first_page.records;

    while !done {
        let token = next.take().ok_or_else(|| {
            SyncError::remote(anyhow::anyhow!(
                "Query page is marked incomplete but carries no nextRecordsUrl"
            ))
        })?;
        let page = remote.query_more(&token).await.map_err(SyncError::remote)?;
        pages += 1;
        tracing::debug!(
            "Fetched page {} ({} records, {} so far)",
            pages,
            page.records.len(),
            records.len() + page.records.len()
        );
        done = page.done;
        next = page.next_records_url;
        records.extend(page.records);
    }

    Ok((records, pages))
}

/// Apply the delta starting at `first_page` to the local table.
///
/// All pages are fetched before the first write. Records are then upserted in
/// arrival order, each one committed on its own; the first failing write aborts the
/// run and leaves earlier rows applied.
pub async fn apply_incremental<R, S>(
    remote: &R,
    store: &mut S,
    layout: &ColumnLayout,
    first_page: QueryPage,
) -> SyncResult<UpsertOutcome>
where
    R: RemoteQuery + ?Sized,
    S: LocalStore + ?Sized,
{
    let (records, pages) = collect_pages(remote, first_page).await?;
    let statement = UpsertStatement::for_layout(layout);
    tracing::debug!("Upsert statement: {}", statement.to_sql());

    let mut rows_written = 0u64;
    for (i, record) in records.iter().enumerate() {
        let row = layout.transform_record(record);
        let affected = store.upsert_row(&statement, &row).await.map_err(|e| {
            SyncError::write(e.context(format!(
                "Failed to upsert record {} of {} into {}",
                i + 1,
                records.len(),
                layout.table
            )))
        })?;
        rows_written += affected;

        if (i + 1) % 1_000 == 0 {
            tracing::info!(
                "Progress: {} - {}/{} rows upserted",
                layout.table,
                i + 1,
                records.len()
            );
        }
    }

    Ok(UpsertOutcome {
        pages,
        rows_fetched: records.len(),
        rows_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statement() -> UpsertStatement {
        UpsertStatement {
            table: "leads".to_string(),
            columns: vec![
                ("id".to_string(), "varchar".to_string()),
                ("email".to_string(), "text".to_string()),
                ("systemmodstamp".to_string(), "timestamptz".to_string()),
            ],
            key_column: "id".to_string(),
        }
    }

    #[test]
    fn test_upsert_sql_shape() {
        let sql = statement().to_sql();
        assert!(sql.starts_with("INSERT INTO \"leads\" (\"id\", \"email\", \"systemmodstamp\")"));
        assert!(sql.contains(
            "VALUES ($1::text::\"varchar\", $2::text::\"text\", $3::text::\"timestamptz\")"
        ));
        assert!(sql.contains("ON CONFLICT (\"id\")"));
        assert!(sql.contains("DO UPDATE SET"));
        assert!(sql.contains("\"email\" = EXCLUDED.\"email\""));
        assert!(sql.contains("\"systemmodstamp\" = EXCLUDED.\"systemmodstamp\""));
        assert!(!sql.contains("\"id\" = EXCLUDED"));
    }

    #[test]
    fn test_upsert_sql_schema_qualified() {
        let mut stmt = statement();
        stmt.table = "crm.leads".to_string();
        assert!(stmt.to_sql().starts_with("INSERT INTO \"crm\".\"leads\""));
    }

    #[test]
    fn test_upsert_sql_key_only_does_nothing() {
        let stmt = UpsertStatement {
            table: "ids".to_string(),
            columns: vec![("id".to_string(), "varchar".to_string())],
            key_column: "id".to_string(),
        };
        let sql = stmt.to_sql();
        assert!(sql.contains("DO NOTHING"));
        assert!(!sql.contains("DO UPDATE SET"));
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(sql_text(&Value::Null), None);
        assert_eq!(sql_text(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(sql_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(sql_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(sql_text(&json!(1.5)).as_deref(), Some("1.5"));
        assert_eq!(
            sql_text(&json!({"city": "Paris"})).as_deref(),
            Some(r#"{"city":"Paris"}"#)
        );
    }
}
