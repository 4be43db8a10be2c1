// ABOUTME: Per-column value transforms applied to every remote value before it is written
// ABOUTME: Resolved once from the column type tag, then reused for every row

use chrono::{TimeZone, Utc};
use serde_json::Value;

/// Output format for timestamps written to timestamp-typed columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Conversion applied to a raw remote value for one local column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTransform {
    /// Write the value as received.
    Identity,
    /// Integer epoch milliseconds become `YYYY-MM-DDTHH:MM:SSZ` (UTC).
    /// Any other value passes through unchanged.
    EpochMillisToTimestamp,
}

impl ValueTransform {
    /// Pick the transform for a column from its PostgreSQL type tag.
    ///
    /// Accepts both the short `udt_name` form (`timestamptz`) and the long
    /// `data_type` form (`timestamp with time zone`).
    pub fn for_type(type_tag: &str) -> Self {
        match type_tag.to_ascii_lowercase().as_str() {
            "timestamptz"
            | "timestamp with time zone"
            | "timestamp"
            | "timestamp without time zone" => ValueTransform::EpochMillisToTimestamp,
            _ => ValueTransform::Identity,
        }
    }

    pub fn apply(&self, value: Value) -> Value {
        match self {
            ValueTransform::Identity => value,
            ValueTransform::EpochMillisToTimestamp => match value.as_i64() {
                Some(millis) => epoch_millis_to_utc(millis)
                    .map(Value::String)
                    .unwrap_or(value),
                None => value,
            },
        }
    }
}

/// Format epoch milliseconds as a UTC timestamp string, truncated to whole seconds.
///
/// Returns `None` when the value is outside the range chrono can represent.
pub fn epoch_millis_to_utc(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
}
