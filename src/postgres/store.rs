// ABOUTME: PostgresStore - LocalStore backed by a tokio-postgres client
// ABOUTME: Per-row autocommitted upserts and transactional DELETE + COPY reloads

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{pin_mut, SinkExt};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Statement};

use crate::sync::reload::BulkLoad;
use crate::sync::store::{ColumnInfo, LocalStore};
use crate::sync::upsert::{sql_text, UpsertStatement};
use crate::utils::{quote_ident, quote_qualified, split_table_name};

/// Destination tables in one PostgreSQL database.
pub struct PostgresStore {
    client: Client,
    /// Last prepared upsert, reused while consecutive rows target the same table
    prepared: Option<(String, Statement)>,
}

impl PostgresStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            prepared: None,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn upsert_statement(&mut self, sql: String) -> Result<Statement> {
        if let Some((cached_sql, statement)) = &self.prepared {
            if *cached_sql == sql {
                return Ok(statement.clone());
            }
        }

        let statement = self
            .client
            .prepare(&sql)
            .await
            .with_context(|| format!("Failed to prepare upsert: {}", sql))?;
        self.prepared = Some((sql, statement.clone()));
        Ok(statement)
    }
}

#[async_trait]
impl LocalStore for PostgresStore {
    async fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let (schema, name) = split_table_name(table);
        let rows = self
            .client
            .query(
                "SELECT column_name::text, udt_name::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &name],
            )
            .await
            .with_context(|| format!("Failed to get columns for {}", table))?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                type_tag: row.get(1),
            })
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let row = self
            .client
            .query_one(
                &format!("SELECT COUNT(*) FROM {}", quote_qualified(table)),
                &[],
            )
            .await
            .with_context(|| format!("Failed to count rows in {}", table))?;
        Ok(row.get(0))
    }

    async fn max_timestamp(&self, table: &str, column: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self
            .client
            .query_one(
                &format!(
                    "SELECT MAX({})::timestamptz FROM {}",
                    quote_ident(column),
                    quote_qualified(table)
                ),
                &[],
            )
            .await
            .with_context(|| format!("Failed to read max({}) from {}", column, table))?;
        Ok(row.get(0))
    }

    async fn upsert_row(&mut self, statement: &UpsertStatement, row: &[Value]) -> Result<u64> {
        let stmt = self.upsert_statement(statement.to_sql()).await?;

        let values: Vec<Option<String>> = row.iter().map(sql_text).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        // Outside an explicit transaction every statement commits on its own.
        let affected = self
            .client
            .execute(&stmt, &params)
            .await
            .with_context(|| format!("Failed to upsert row into {}", statement.table))?;

        Ok(affected)
    }

    async fn replace_all(&mut self, load: &BulkLoad, payload: Vec<Bytes>) -> Result<u64> {
        let tx = self
            .client
            .transaction()
            .await
            .context("Failed to start reload transaction")?;

        let deleted = tx
            .execute(&load.delete_sql(), &[])
            .await
            .with_context(|| format!("Failed to clear {}", load.table))?;
        tracing::debug!("Deleted {} rows from {}", deleted, load.table);

        let sink = tx
            .copy_in::<_, Bytes>(&load.copy_sql())
            .await
            .with_context(|| format!("Failed to start COPY into {}", load.table))?;
        pin_mut!(sink);

        for chunk in payload {
            sink.send(chunk)
                .await
                .with_context(|| format!("Failed to stream rows into {}", load.table))?;
        }
        let loaded = sink
            .as_mut()
            .finish()
            .await
            .with_context(|| format!("Failed to finish COPY into {}", load.table))?;

        // Dropping the transaction without commit rolls back the delete as well.
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit reload of {}", load.table))?;

        Ok(loaded)
    }
}
