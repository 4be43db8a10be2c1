// ABOUTME: Watermark-driven sync of one remote object into one local table
// ABOUTME: Chooses between incremental upserts and a full bulk reload per run

pub mod estimator;
pub mod mapper;
pub mod reload;
pub mod runner;
pub mod store;
pub mod transform;
pub mod upsert;
pub mod watermark;

pub use estimator::{
    choose_strategy, DeltaPlan, ReloadReason, SyncStrategy, DEFAULT_FULL_RELOAD_RATIO,
};
pub use mapper::{build_layout, ColumnLayout, FieldMapping, MappedColumn, SyncTarget};
pub use reload::BulkLoad;
pub use runner::{validate_target, SyncOptions, SyncReport, Synchronizer};
pub use store::{ColumnInfo, LocalStore};
pub use transform::ValueTransform;
pub use upsert::UpsertStatement;
pub use watermark::{read_watermark, Watermark, WatermarkBoundary};
