// ABOUTME: Synchronizer - runs one sync target from mapping validation to the chosen strategy
// ABOUTME: Field Mapper -> Watermark Reader -> Delta Estimator -> Upserter or Bulk Reloader

use serde::Serialize;
use std::time::Instant;

use super::estimator::{
    estimate_delta, DeltaPlan, ReloadReason, SyncStrategy, DEFAULT_FULL_RELOAD_RATIO,
};
use super::mapper::{build_layout, ColumnLayout, SyncTarget};
use super::reload::full_reload;
use super::store::LocalStore;
use super::upsert::apply_incremental;
use super::watermark::{read_watermark, Watermark, WatermarkBoundary};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteQuery;

/// Per-target tuning of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    pub boundary: WatermarkBoundary,
    /// Total/first-page ratio at which the run switches to a full reload
    pub full_reload_ratio: f64,
    /// Stop after choosing the strategy; nothing is written
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            boundary: WatermarkBoundary::default(),
            full_reload_ratio: DEFAULT_FULL_RELOAD_RATIO,
            dry_run: false,
        }
    }
}

/// Summary of one run, printed by `sync --json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub object: String,
    pub strategy: SyncStrategy,
    pub reload_reason: Option<ReloadReason>,
    pub watermark: Watermark,
    pub rows_fetched: usize,
    pub rows_written: u64,
    pub dry_run: bool,
    pub duration_ms: u64,
}

/// Check `target`'s mapping against the live schema of its table.
pub async fn validate_target<S>(store: &S, target: &SyncTarget) -> SyncResult<ColumnLayout>
where
    S: LocalStore + ?Sized,
{
    let schema = store
        .table_schema(&target.table)
        .await
        .map_err(SyncError::write)?;
    if schema.is_empty() {
        return Err(SyncError::config(format!(
            "Table '{}' does not exist or has no columns",
            target.table
        )));
    }
    build_layout(target, &schema)
}

/// Runs sync targets against one remote and one local store.
///
/// The store is borrowed mutably for the whole lifetime of the synchronizer, so two
/// runs can never share a connection concurrently.
pub struct Synchronizer<'a, R: ?Sized, S: ?Sized> {
    remote: &'a R,
    store: &'a mut S,
    options: SyncOptions,
}

impl<'a, R, S> Synchronizer<'a, R, S>
where
    R: RemoteQuery + ?Sized,
    S: LocalStore + ?Sized,
{
    pub fn new(remote: &'a R, store: &'a mut S, options: SyncOptions) -> Self {
        Self {
            remote,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Validate the target's mapping against the live table. No remote calls.
    pub async fn validate(&self, target: &SyncTarget) -> SyncResult<ColumnLayout> {
        validate_target(&*self.store, target).await
    }

    /// Validate the mapping and read the watermark.
    pub async fn watermark(&self, target: &SyncTarget) -> SyncResult<(ColumnLayout, Watermark)> {
        let layout = self.validate(target).await?;
        let watermark = read_watermark(&*self.store, &layout).await?;
        Ok((layout, watermark))
    }

    /// Bring the target's table up to date.
    pub async fn run(&mut self, target: &SyncTarget) -> SyncResult<SyncReport> {
        let start = Instant::now();
        tracing::info!("Updating {} from {}...", target.table, target.object);

        let (layout, watermark) = self.watermark(target).await?;
        tracing::info!(
            "{}: {} local rows, watermark {}",
            layout.table,
            watermark.row_count,
            watermark
                .soql_literal()
                .unwrap_or_else(|| "none".to_string())
        );

        let plan = estimate_delta(
            self.remote,
            &layout,
            &watermark,
            self.options.boundary,
            self.options.full_reload_ratio,
        )
        .await?;
        let strategy = plan.strategy();

        let mut report = SyncReport {
            table: layout.table.clone(),
            object: layout.object.clone(),
            strategy,
            reload_reason: None,
            watermark,
            rows_fetched: 0,
            rows_written: 0,
            dry_run: self.options.dry_run,
            duration_ms: 0,
        };

        match plan {
            DeltaPlan::Incremental { first_page } => {
                tracing::info!(
                    "Using incremental sync for {} ({} changed records)",
                    layout.table,
                    first_page.total_size
                );
                if self.options.dry_run {
                    report.rows_fetched = first_page.records.len();
                } else {
                    tracing::warn!(
                        "Records deleted from {} are not propagated; they stay in {}",
                        layout.object,
                        layout.table
                    );
                    let outcome =
                        apply_incremental(self.remote, &mut *self.store, &layout, first_page)
                            .await?;
                    report.rows_fetched = outcome.rows_fetched;
                    report.rows_written = outcome.rows_written;
                }
            }
            DeltaPlan::FullReload { reason } => {
                report.reload_reason = Some(reason);
                match reason {
                    ReloadReason::EmptyTable => {
                        tracing::info!("Using full reload for {} (no local data)", layout.table)
                    }
                    ReloadReason::LargeDelta { total, first_page } => tracing::info!(
                        "Switching to bulk reload for {} ({} changed records, first page {})",
                        layout.table,
                        total,
                        first_page
                    ),
                }
                if !self.options.dry_run {
                    let outcome = full_reload(self.remote, &mut *self.store, &layout).await?;
                    report.rows_fetched = outcome.rows_fetched;
                    report.rows_written = outcome.rows_written;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Finished {} ({}{}): {} fetched, {} written in {}ms",
            report.table,
            report.strategy,
            if report.dry_run { ", dry run" } else { "" },
            report.rows_fetched,
            report.rows_written,
            report.duration_ms
        );

        Ok(report)
    }
}
