// ABOUTME: HTTP client for the Salesforce REST query API
// ABOUTME: Handles authentication headers, paging requests, and error responses

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use super::models::{ApiError, BulkApiError, QueryPage, RemoteRecord};
use super::RemoteQuery;
use crate::utils::validate_soql_identifier;

/// Default REST API version used when the configuration does not name one.
pub const DEFAULT_API_VERSION: &str = "59.0";

/// Client for one Salesforce org, authenticated with an OAuth access token.
pub struct SalesforceClient {
    pub(super) client: Client,
    pub(super) instance_url: String,
    pub(super) api_version: String,
    pub(super) access_token: String,
    pub(super) bulk_poll_interval: Duration,
    pub(super) bulk_timeout: Duration,
}

impl SalesforceClient {
    /// Create a client for `instance_url` (e.g. `https://acme.my.salesforce.com`).
    pub fn new(instance_url: &str, api_version: Option<&str>, access_token: String) -> Result<Self> {
        let parsed = url::Url::parse(instance_url)
            .with_context(|| format!("Invalid Salesforce instance URL: {}", instance_url))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            bail!(
                "Salesforce instance URL must use https, got: {}",
                instance_url
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            api_version: api_version
                .unwrap_or(DEFAULT_API_VERSION)
                .trim_start_matches('v')
                .to_string(),
            access_token,
            bulk_poll_interval: Duration::from_secs(5),
            bulk_timeout: Duration::from_secs(3600),
        })
    }

    /// Override how often bulk batches are polled and how long to wait in total.
    pub fn with_bulk_polling(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.bulk_poll_interval = poll_interval;
        self.bulk_timeout = timeout;
        self
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn query_url(&self) -> String {
        format!(
            "{}/services/data/v{}/query",
            self.instance_url, self.api_version
        )
    }

    /// Resolve a `nextRecordsUrl`, which the API returns as an instance-relative path.
    ///
    /// Absolute URLs are only followed when they point at the instance host; the
    /// access token is sent with the request.
    fn resolve_url(&self, path: &str) -> Result<String> {
        if !(path.starts_with("http://") || path.starts_with("https://")) {
            return Ok(format!("{}{}", self.instance_url, path));
        }

        let instance = url::Url::parse(&self.instance_url)
            .with_context(|| format!("Invalid Salesforce instance URL: {}", self.instance_url))?;
        let next = url::Url::parse(path)
            .with_context(|| format!("Invalid nextRecordsUrl: {}", path))?;
        if next.scheme() != instance.scheme()
            || next.host_str() != instance.host_str()
            || next.port_or_known_default() != instance.port_or_known_default()
        {
            bail!(
                "Refusing to follow nextRecordsUrl outside {}: {}",
                self.instance_url,
                path
            );
        }
        Ok(path.to_string())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
    }

    async fn fetch_page(&self, request: RequestBuilder, action: &str) -> Result<QueryPage> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Failed to {}: request did not complete", action))?;
        let response = ensure_success(response, action).await?;

        response
            .json::<QueryPage>()
            .await
            .with_context(|| format!("Failed to parse response to {}", action))
    }
}

#[async_trait]
impl RemoteQuery for SalesforceClient {
    async fn query(&self, soql: &str) -> Result<QueryPage> {
        tracing::debug!("SOQL: {}", soql);
        let request = self.client.get(self.query_url()).query(&[("q", soql)]);
        self.fetch_page(request, "run SOQL query").await
    }

    async fn query_more(&self, next_records_url: &str) -> Result<QueryPage> {
        let request = self.client.get(self.resolve_url(next_records_url)?);
        self.fetch_page(request, "fetch next query page").await
    }

    async fn bulk_query(&self, object: &str, soql: &str) -> Result<Vec<RemoteRecord>> {
        validate_soql_identifier(object)?;
        self.run_bulk_query(object, soql).await
    }

    async fn count(&self, object: &str) -> Result<i64> {
        validate_soql_identifier(object)?;
        let page = self
            .query(&format!("SELECT COUNT() FROM {}", object))
            .await
            .with_context(|| format!("Failed to count {} records", object))?;
        Ok(page.total_size)
    }
}

/// Turn a non-2xx response into an error carrying the API's own message.
pub(super) async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        bail!(
            "Salesforce rejected the access token while trying to {}.\n\
             The session may have expired; obtain a new token and set SFDC_ACCESS_TOKEN",
            action
        );
    }

    bail!(
        "Salesforce returned {} while trying to {}: {}",
        status,
        action,
        describe_error_body(&body)
    );
}

/// Extract readable messages from REST (`[{message, errorCode}]`) or Bulk
/// (`{exceptionCode, exceptionMessage}`) error bodies, falling back to the raw text.
pub(super) fn describe_error_body(body: &str) -> String {
    if let Ok(errors) = serde_json::from_str::<Vec<ApiError>>(body) {
        if !errors.is_empty() {
            return errors
                .iter()
                .map(|e| match &e.error_code {
                    Some(code) => format!("{}: {}", code, e.message),
                    None => e.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ");
        }
    }
    if let Ok(error) = serde_json::from_str::<BulkApiError>(body) {
        return format!("{}: {}", error.exception_code, error.exception_message);
    }
    body.trim().to_string()
}
