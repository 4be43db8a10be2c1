// ABOUTME: Watermark Reader - reads the local row count and highest modification timestamp
// ABOUTME: The watermark is the lower bound of the next delta query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mapper::ColumnLayout;
use super::store::LocalStore;
use super::transform::TIMESTAMP_FORMAT;
use crate::error::{SyncError, SyncResult};

/// Local high-water mark of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub row_count: i64,
    /// `None` means there is no prior data, which is not the same as epoch zero.
    pub max_modstamp: Option<DateTime<Utc>>,
}

impl Watermark {
    pub fn empty() -> Self {
        Self {
            row_count: 0,
            max_modstamp: None,
        }
    }

    /// True when no modstamp is stored locally, so no delta filter can be built.
    pub fn is_empty(&self) -> bool {
        self.max_modstamp.is_none()
    }

    /// Watermark formatted as a SOQL datetime literal.
    pub fn soql_literal(&self) -> Option<String> {
        self.max_modstamp
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
    }
}

/// Comparison used between the remote modstamp and the watermark.
///
/// `Exclusive` (`>`) never re-fetches the boundary record but can miss records that
/// share its exact timestamp and became visible after the last run. `Inclusive`
/// (`>=`) re-processes boundary records on every run instead; that is harmless
/// because upserts are idempotent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkBoundary {
    #[default]
    Exclusive,
    Inclusive,
}

impl WatermarkBoundary {
    pub fn operator(&self) -> &'static str {
        match self {
            WatermarkBoundary::Exclusive => ">",
            WatermarkBoundary::Inclusive => ">=",
        }
    }
}

/// Read the watermark of the layout's table.
pub async fn read_watermark<S>(store: &S, layout: &ColumnLayout) -> SyncResult<Watermark>
where
    S: LocalStore + ?Sized,
{
    let row_count = store
        .row_count(&layout.table)
        .await
        .map_err(SyncError::write)?;
    let max_modstamp = store
        .max_timestamp(&layout.table, &layout.modstamp_column)
        .await
        .map_err(SyncError::write)?;

    if row_count > 0 && max_modstamp.is_none() {
        tracing::warn!(
            "Table {} has {} rows but no {} values; treating it as empty",
            layout.table,
            row_count,
            layout.modstamp_column
        );
    }

    Ok(Watermark {
        row_count,
        max_modstamp,
    })
}
