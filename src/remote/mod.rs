// ABOUTME: Remote query capability used by the sync core, plus the Salesforce implementation
// ABOUTME: Row-oriented paging queries, bulk export, and object counts

pub mod bulk;
pub mod client;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;

pub use client::SalesforceClient;
pub use models::{QueryPage, RemoteRecord};

/// Source of remote records.
///
/// Paging is cursor based: every `query_more` call needs the token returned by the
/// previous page, so pages can only be fetched one after the other.
#[async_trait]
pub trait RemoteQuery: Send + Sync {
    /// Run a SOQL query and return its first page.
    async fn query(&self, soql: &str) -> Result<QueryPage>;

    /// Fetch the page behind a continuation token (`nextRecordsUrl`).
    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage>;

    /// Export the full result of `soql` through the bulk path.
    async fn bulk_query(&self, object: &str, soql: &str) -> Result<Vec<RemoteRecord>>;

    /// Number of records of `object`, unfiltered.
    async fn count(&self, object: &str) -> Result<i64>;
}
