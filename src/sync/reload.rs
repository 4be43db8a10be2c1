// ABOUTME: Bulk Reloader - exports the whole remote object and atomically replaces the table
// ABOUTME: Verifies the export against the remote count before anything local is touched

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use serde_json::Value;

use super::estimator::select_all;
use super::mapper::ColumnLayout;
use super::store::LocalStore;
use super::upsert::sql_text;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteQuery;
use crate::utils::{quote_ident, quote_qualified};

/// Rows per CSV chunk handed to the bulk-load path.
pub const CSV_CHUNK_ROWS: usize = 5_000;

/// Target of a delete-and-reload: the table and its columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoad {
    pub table: String,
    pub columns: Vec<String>,
}

impl BulkLoad {
    pub fn for_layout(layout: &ColumnLayout) -> Self {
        Self {
            table: layout.table.clone(),
            columns: layout.columns.iter().map(|c| c.local.clone()).collect(),
        }
    }

    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {}", quote_qualified(&self.table))
    }

    /// `COPY` statement reading the CSV produced by [`encode_csv`].
    pub fn copy_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',')",
            quote_qualified(&self.table),
            columns.join(", ")
        )
    }
}

/// Encode rows as CSV chunks. The first chunk starts with the header line.
///
/// Every non-NULL value is quoted and NULL is an unquoted empty field, which is how
/// `COPY ... (FORMAT csv)` tells the two apart. An empty string therefore loads as
/// an empty string, same as through the upsert path.
pub fn encode_csv(columns: &[String], rows: &[Vec<Value>], chunk_rows: usize) -> Result<Vec<Bytes>> {
    let chunk_rows = chunk_rows.max(1);
    let mut chunks = Vec::with_capacity(rows.len() / chunk_rows + 1);

    let mut writer = chunk_writer();
    writer
        .write_record(columns.iter().map(|c| quote_field(c)))
        .context("Failed to encode CSV header")?;
    let mut in_chunk = 0usize;

    for row in rows {
        for value in row {
            let field = sql_text(value).map(|text| quote_field(&text));
            writer
                .write_field(field.as_deref().unwrap_or(""))
                .context("Failed to encode CSV field")?;
        }
        writer
            .write_record(None::<&[u8]>)
            .context("Failed to encode CSV row")?;
        in_chunk += 1;

        if in_chunk == chunk_rows {
            chunks.push(finish_chunk(writer)?);
            writer = chunk_writer();
            in_chunk = 0;
        }
    }

    if in_chunk > 0 || chunks.is_empty() {
        chunks.push(finish_chunk(writer)?);
    }

    Ok(chunks)
}

/// Fields are quoted by [`quote_field`]; the writer only places delimiters and
/// terminators.
fn chunk_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new())
}

fn quote_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn finish_chunk(writer: csv::Writer<Vec<u8>>) -> Result<Bytes> {
    writer
        .into_inner()
        .map(Bytes::from)
        .map_err(|e| anyhow!("Failed to flush CSV chunk: {}", e.error()))
}

/// Counts from a full reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub rows_fetched: usize,
    pub rows_written: u64,
}

/// Replace the local table with a full export of the remote object.
///
/// Fails with [`SyncError::Consistency`] when the export size differs from the
/// remote count taken just before it; the local table is left untouched then.
pub async fn full_reload<R, S>(
    remote: &R,
    store: &mut S,
    layout: &ColumnLayout,
) -> SyncResult<ReloadOutcome>
where
    R: RemoteQuery + ?Sized,
    S: LocalStore + ?Sized,
{
    let expected = remote
        .count(&layout.object)
        .await
        .map_err(SyncError::remote)?;
    tracing::info!("Expecting {} {} records from bulk export", expected, layout.object);

    let records = remote
        .bulk_query(&layout.object, &select_all(layout))
        .await
        .map_err(SyncError::remote)?;

    if i64::try_from(records.len()).ok() != Some(expected) {
        return Err(SyncError::Consistency {
            expected,
            actual: records.len(),
        });
    }
    tracing::info!("Got {} rows from bulk export", records.len());

    let rows: Vec<Vec<Value>> = records
        .iter()
        .map(|record| layout.transform_record(record))
        .collect();

    let load = BulkLoad::for_layout(layout);
    tracing::debug!("Bulk load: {}; {}", load.delete_sql(), load.copy_sql());
    let payload = encode_csv(&load.columns, &rows, CSV_CHUNK_ROWS).map_err(SyncError::write)?;

    let rows_written = store
        .replace_all(&load, payload)
        .await
        .map_err(|e| SyncError::write(e.context(format!("Failed to reload {}", layout.table))))?;

    Ok(ReloadOutcome {
        rows_fetched: records.len(),
        rows_written,
    })
}
