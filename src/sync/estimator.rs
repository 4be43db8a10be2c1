// ABOUTME: Delta Estimator - queries the remote delta once and picks the sync strategy
// ABOUTME: The decision itself is a pure function of the first page's counts

use serde::Serialize;

use super::mapper::ColumnLayout;
use super::watermark::{Watermark, WatermarkBoundary};
use crate::error::{SyncError, SyncResult};
use crate::remote::{QueryPage, RemoteQuery};

/// Default ratio of total matching rows to first-page rows at which paging is
/// abandoned for a bulk reload.
pub const DEFAULT_FULL_RELOAD_RATIO: f64 = 5.0;

/// How a run brings the local table up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Page through the delta and upsert row by row.
    Incremental,
    /// Export everything through the bulk path and replace the table.
    FullReload,
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStrategy::Incremental => write!(f, "incremental"),
            SyncStrategy::FullReload => write!(f, "full reload"),
        }
    }
}

/// Decide the strategy from the first page of the delta query.
///
/// A complete first page always means `Incremental`. Otherwise a total at least
/// `threshold` times the page size means paging would take too many round trips.
/// An empty but incomplete first page gives no ratio and is treated as unbounded.
pub fn choose_strategy(
    total: i64,
    first_page_len: usize,
    done: bool,
    threshold: f64,
) -> SyncStrategy {
    if done {
        return SyncStrategy::Incremental;
    }
    if first_page_len == 0 {
        return SyncStrategy::FullReload;
    }
    if total as f64 / first_page_len as f64 >= threshold {
        SyncStrategy::FullReload
    } else {
        SyncStrategy::Incremental
    }
}

/// Why a full reload was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadReason {
    /// No local watermark; nothing to build a delta from.
    EmptyTable,
    /// The delta is too large to page through.
    LargeDelta { total: i64, first_page: usize },
}

/// Outcome of the delta estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaPlan {
    /// Page through the delta, starting from the already fetched first page.
    Incremental { first_page: QueryPage },
    FullReload { reason: ReloadReason },
}

impl DeltaPlan {
    pub fn strategy(&self) -> SyncStrategy {
        match self {
            DeltaPlan::Incremental { .. } => SyncStrategy::Incremental,
            DeltaPlan::FullReload { .. } => SyncStrategy::FullReload,
        }
    }
}

/// `SELECT <all mapped fields> FROM <object>`, without a filter.
pub fn select_all(layout: &ColumnLayout) -> String {
    format!(
        "SELECT {} FROM {}",
        layout.remote_fields().join(", "),
        layout.object
    )
}

/// The delta query for `watermark`; unfiltered when the watermark is empty.
pub fn delta_query(
    layout: &ColumnLayout,
    watermark: &Watermark,
    boundary: WatermarkBoundary,
) -> String {
    let select = select_all(layout);
    match watermark.soql_literal() {
        Some(literal) => format!(
            "{} WHERE {} {} {}",
            select,
            modstamp_field(layout),
            boundary.operator(),
            literal
        ),
        None => select,
    }
}

fn modstamp_field(layout: &ColumnLayout) -> &str {
    layout
        .columns
        .iter()
        .find(|c| c.local == layout.modstamp_column)
        .map(|c| c.remote.as_str())
        .unwrap_or(super::mapper::MODSTAMP_FIELD)
}

/// Query the first page of the remote delta and decide how to sync.
///
/// An empty watermark goes straight to a full reload without a delta query. Otherwise the
/// delta query runs once through the row-oriented path.
pub async fn estimate_delta<R>(
    remote: &R,
    layout: &ColumnLayout,
    watermark: &Watermark,
    boundary: WatermarkBoundary,
    threshold: f64,
) -> SyncResult<DeltaPlan>
where
    R: RemoteQuery + ?Sized,
{
    if watermark.is_empty() {
        tracing::info!(
            "{} has no local watermark; planning a full reload",
            layout.table
        );
        return Ok(DeltaPlan::FullReload {
            reason: ReloadReason::EmptyTable,
        });
    }

    let query = delta_query(layout, watermark, boundary);
    tracing::debug!("Delta query: {}", query);

    let first_page = remote.query(&query).await.map_err(SyncError::remote)?;
    tracing::info!(
        "Got {} rows out of {} changed {} records",
        first_page.records.len(),
        first_page.total_size,
        layout.object
    );

    match choose_strategy(
        first_page.total_size,
        first_page.records.len(),
        first_page.done,
        threshold,
    ) {
        SyncStrategy::Incremental => Ok(DeltaPlan::Incremental { first_page }),
        SyncStrategy::FullReload => Ok(DeltaPlan::FullReload {
            reason: ReloadReason::LargeDelta {
                total: first_page.total_size,
                first_page: first_page.records.len(),
            },
        }),
    }
}
