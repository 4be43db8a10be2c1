// ABOUTME: Data structures exchanged with the Salesforce REST and Bulk APIs
// ABOUTME: Deserialized from JSON responses; requests are serialized the same way

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One remote record keyed by field API name.
///
/// Records returned by the REST API also carry an `attributes` entry; it is never
/// looked up, so it needs no special handling.
pub type RemoteRecord = serde_json::Map<String, Value>;

/// One page of a row-oriented query.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    /// Number of records matching the whole query, not just this page
    pub total_size: i64,
    /// True when this is the last page
    pub done: bool,
    #[serde(default)]
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
}

/// Error entry returned by the REST API on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub message: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Error body returned by the Bulk API on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApiError {
    pub exception_code: String,
    pub exception_message: String,
}

/// Bulk API job creation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest<'a> {
    pub operation: &'a str,
    pub object: &'a str,
    pub content_type: &'a str,
}

/// Bulk API job state change request.
#[derive(Debug, Clone, Serialize)]
pub struct JobStateRequest<'a> {
    pub state: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub id: String,
    pub job_id: String,
    pub state: BatchState,
    #[serde(default)]
    pub state_message: Option<String>,
    #[serde(default)]
    pub number_records_processed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
    NotProcessed,
}

impl BatchState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BatchState::Queued | BatchState::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_page_deserialization() {
        let body = r#"{
            "totalSize": 3,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD0000002HU6KIAW-2000",
            "records": [
                {"attributes": {"type": "Lead", "url": "/x"}, "Id": "00Q1", "Email": null}
            ]
        }"#;
        let page: QueryPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.total_size, 3);
        assert!(!page.done);
        assert_eq!(
            page.next_records_url.as_deref(),
            Some("/services/data/v59.0/query/01gD0000002HU6KIAW-2000")
        );
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0]["Id"], "00Q1");
    }

    #[test]
    fn test_count_page_without_records() {
        let page: QueryPage = serde_json::from_str(r#"{"totalSize": 42, "done": true}"#).unwrap();
        assert_eq!(page.total_size, 42);
        assert!(page.records.is_empty());
        assert!(page.next_records_url.is_none());
    }

    #[test]
    fn test_batch_info_deserialization() {
        let body = r#"{
            "id": "751x", "jobId": "750x", "state": "Failed",
            "stateMessage": "InvalidBatch : Failed to process query",
            "numberRecordsProcessed": 0
        }"#;
        let batch: BatchInfo = serde_json::from_str(body).unwrap();
        assert_eq!(batch.state, BatchState::Failed);
        assert!(batch.state.is_finished());
        assert!(batch.state_message.unwrap().contains("InvalidBatch"));
        assert!(!BatchState::InProgress.is_finished());
    }

    #[test]
    fn test_job_info_deserialization() {
        let body = r#"{"id": "750x", "state": "Open", "object": "Lead", "contentType": "JSON"}"#;
        let job: JobInfo = serde_json::from_str(body).unwrap();
        assert_eq!(job.id, "750x");
        assert_eq!(job.state, "Open");
    }

    #[test]
    fn test_create_job_request_serialization() {
        let request = CreateJobRequest {
            operation: "query",
            object: "Lead",
            content_type: "JSON",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"operation": "query", "object": "Lead", "contentType": "JSON"})
        );
    }
}
