// ABOUTME: Error taxonomy for a single sync run
// ABOUTME: Every variant is fatal for the run; none of them is retried internally

use thiserror::Error;

/// Boxed cause carried by the remote and write variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of one sync run.
///
/// Adapters report their own failures with `anyhow`; the sync core classifies them
/// into the variant that tells the caller how much local state may have changed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Mapping and live schema disagree. Raised before any remote call or local write.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bulk export returned a different number of records than the remote count.
    /// The local table has not been touched.
    #[error(
        "expected {expected} records from bulk export but got {actual}; \
         the object may have changed during the export, try again"
    )]
    Consistency { expected: i64, actual: usize },

    /// Remote query, paging or bulk export failed.
    #[error("remote query failed")]
    RemoteTransient(#[source] BoxError),

    /// Local read or write failed. Rows committed before the failure stay applied.
    #[error("local database operation failed")]
    Write(#[source] BoxError),
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    pub fn remote(err: anyhow::Error) -> Self {
        SyncError::RemoteTransient(err.into())
    }

    pub fn write(err: anyhow::Error) -> Self {
        SyncError::Write(err.into())
    }

    /// Whether the local table can have been modified before this error was raised.
    pub fn may_have_partial_writes(&self) -> bool {
        matches!(self, SyncError::Write(_))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
