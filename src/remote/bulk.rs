// ABOUTME: Bulk API export path - runs a query as an asynchronous bulk job
// ABOUTME: Creates the job, polls the batch, and downloads every result set

use anyhow::{bail, Context, Result};
use std::time::Instant;

use super::client::{ensure_success, SalesforceClient};
use super::models::{
    BatchInfo, BatchState, CreateJobRequest, JobInfo, JobStateRequest, RemoteRecord,
};

impl SalesforceClient {
    fn bulk_base_url(&self) -> String {
        format!(
            "{}/services/async/{}/job",
            self.instance_url, self.api_version
        )
    }

    fn bulk_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("X-SFDC-Session", &self.access_token)
            .header("Accept", "application/json")
    }

    /// Run `soql` as a JSON bulk query job against `object`.
    ///
    /// Large exports are split by the server into several result sets; all of them
    /// are downloaded in order. The job is closed afterwards whether or not the
    /// export succeeded.
    pub(super) async fn run_bulk_query(
        &self,
        object: &str,
        soql: &str,
    ) -> Result<Vec<RemoteRecord>> {
        tracing::info!("Starting bulk query job for {}", object);
        tracing::debug!("Bulk SOQL: {}", soql);

        let job = self.create_job(object).await?;
        tracing::debug!("Created bulk job {} in state {}", job.id, job.state);
        let result = self.export_job(&job, soql).await;

        if let Err(e) = self.close_job(&job.id).await {
            tracing::warn!("Failed to close bulk job {}: {:?}", job.id, e);
        }

        result
    }

    async fn export_job(&self, job: &JobInfo, soql: &str) -> Result<Vec<RemoteRecord>> {
        let batch = self.add_query_batch(&job.id, soql).await?;
        let batch = self.wait_for_batch(&job.id, &batch.id).await?;

        let result_ids = self.list_results(&job.id, &batch.id).await?;
        tracing::info!(
            "Bulk job {} completed with {} result set(s)",
            job.id,
            result_ids.len()
        );

        let mut records = Vec::new();
        for result_id in &result_ids {
            let chunk = self.fetch_result(&job.id, &batch.id, result_id).await?;
            tracing::debug!("Result set {} contained {} records", result_id, chunk.len());
            records.extend(chunk);
        }

        Ok(records)
    }

    async fn create_job(&self, object: &str) -> Result<JobInfo> {
        let body = CreateJobRequest {
            operation: "query",
            object,
            content_type: "JSON",
        };
        let response = self
            .bulk_request(self.client.post(self.bulk_base_url()))
            .json(&body)
            .send()
            .await
            .context("Failed to create bulk query job")?;
        let response = ensure_success(response, "create bulk query job").await?;

        response
            .json::<JobInfo>()
            .await
            .context("Failed to parse bulk job response")
    }

    async fn add_query_batch(&self, job_id: &str, soql: &str) -> Result<BatchInfo> {
        let url = format!("{}/{}/batch", self.bulk_base_url(), job_id);
        let response = self
            .bulk_request(self.client.post(&url))
            .header("Content-Type", "application/json; charset=UTF-8")
            .body(soql.to_string())
            .send()
            .await
            .context("Failed to submit bulk query batch")?;
        let response = ensure_success(response, "submit bulk query batch").await?;

        response
            .json::<BatchInfo>()
            .await
            .context("Failed to parse bulk batch response")
    }

    async fn get_batch(&self, job_id: &str, batch_id: &str) -> Result<BatchInfo> {
        let url = format!("{}/{}/batch/{}", self.bulk_base_url(), job_id, batch_id);
        let response = self
            .bulk_request(self.client.get(&url))
            .send()
            .await
            .context("Failed to get bulk batch status")?;
        let response = ensure_success(response, "get bulk batch status").await?;

        response
            .json::<BatchInfo>()
            .await
            .context("Failed to parse bulk batch status")
    }

    async fn wait_for_batch(&self, job_id: &str, batch_id: &str) -> Result<BatchInfo> {
        let started = Instant::now();
        loop {
            let batch = self.get_batch(job_id, batch_id).await?;
            if batch.state.is_finished() {
                if batch.state == BatchState::Completed {
                    return Ok(batch);
                }
                bail!(
                    "Bulk batch {} of job {} ended in state {:?}: {}",
                    batch.id,
                    batch.job_id,
                    batch.state,
                    batch.state_message.as_deref().unwrap_or("no message")
                );
            }

            if started.elapsed() >= self.bulk_timeout {
                bail!(
                    "Bulk batch {} of job {} did not finish within {:?}",
                    batch_id,
                    job_id,
                    self.bulk_timeout
                );
            }
            tracing::debug!(
                "Bulk batch {} is {:?} ({} records processed)",
                batch_id,
                batch.state,
                batch.number_records_processed.unwrap_or(0)
            );
            tokio::time::sleep(self.bulk_poll_interval).await;
        }
    }

    async fn list_results(&self, job_id: &str, batch_id: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/{}/batch/{}/result",
            self.bulk_base_url(),
            job_id,
            batch_id
        );
        let response = self
            .bulk_request(self.client.get(&url))
            .send()
            .await
            .context("Failed to list bulk results")?;
        let response = ensure_success(response, "list bulk results").await?;

        response
            .json::<Vec<String>>()
            .await
            .context("Failed to parse bulk result list")
    }

    async fn fetch_result(
        &self,
        job_id: &str,
        batch_id: &str,
        result_id: &str,
    ) -> Result<Vec<RemoteRecord>> {
        let url = format!(
            "{}/{}/batch/{}/result/{}",
            self.bulk_base_url(),
            job_id,
            batch_id,
            result_id
        );
        // Result sets can be large; the default request timeout does not apply here.
        let response = self
            .bulk_request(self.client.get(&url))
            .timeout(self.bulk_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to download bulk result {}", result_id))?;
        let response = ensure_success(response, "download bulk result").await?;

        response
            .json::<Vec<RemoteRecord>>()
            .await
            .with_context(|| format!("Failed to parse bulk result {}", result_id))
    }

    async fn close_job(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/{}", self.bulk_base_url(), job_id);
        let response = self
            .bulk_request(self.client.post(&url))
            .json(&JobStateRequest { state: "Closed" })
            .send()
            .await
            .context("Failed to close bulk job")?;
        ensure_success(response, "close bulk job").await?;
        Ok(())
    }
}
