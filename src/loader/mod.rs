//! Bulk loading into the graph database
//!
//! [`BulkLoader::submit`] starts an asynchronous ingest of a staged file and
//! returns a [`BulkLoadJob`]; [`BulkLoader::await_completion`] polls it until
//! a terminal status or the caller's timeout. Submissions are never retried:
//! a failed load is reported with the loader's detail and the caller decides
//! whether to submit again. Status polls are retried, since a failed poll
//! says nothing about a load that was already accepted.
//!
//! # Module Structure
//!
//! - [`job`] - Job state machine, requests and summaries
//! - [`http`] - Loader endpoint protocol

pub mod http;
pub mod job;

pub use http::{LoaderClient, Parallelism};
pub use job::{BulkLoadJob, LoadRequest, LoadStatus, LoadSummary, LoaderEndpoint, StatusReport};

use crate::error::{CompletionError, LoadError, TimeoutError};
use std::time::{Duration, Instant};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls are never closer together than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub poll_interval: Duration,
    pub parallelism: Parallelism,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            parallelism: Parallelism::default(),
        }
    }
}

#[derive(Clone)]
pub struct BulkLoader {
    client: LoaderClient,
    options: LoadOptions,
}

impl BulkLoader {
    pub fn new(options: LoadOptions) -> Result<Self, LoadError> {
        Ok(Self {
            client: LoaderClient::new()?,
            options,
        })
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Submit a staged source to the writer endpoint.
    pub async fn submit(&self, request: LoadRequest) -> Result<BulkLoadJob, LoadError> {
        let endpoint = request.writer()?;
        tracing::info!("Submitting bulk load of {} to {}", request.source, endpoint);

        let load_id = self
            .client
            .submit(endpoint, &request, self.options.parallelism)
            .await?;

        tracing::info!("Bulk load accepted with id {}", load_id);
        Ok(BulkLoadJob::new(&load_id, request))
    }

    /// Fetch the current status once and fold it into the job.
    pub async fn poll(&self, job: &mut BulkLoadJob) -> Result<LoadStatus, LoadError> {
        let endpoint = job.request.writer()?;
        let report = self.client.status(endpoint, &job.load_id).await?;
        Ok(job.apply(report))
    }

    /// Poll until the job is terminal. Returns the load summary on success,
    /// [`CompletionError::Load`] when the loader reports a failed load and
    /// [`CompletionError::Timeout`] when `timeout` passes first. In that last
    /// case the remote job is left running and its outcome is unknown. Polls
    /// that fail (transport errors, error statuses) are retried until the
    /// deadline; the last one is reported on the timeout.
    pub async fn await_completion(
        &self,
        job: &mut BulkLoadJob,
        timeout: Duration,
    ) -> Result<LoadSummary, CompletionError> {
        let started = Instant::now();

        match tokio::time::timeout(timeout, self.poll_until_terminal(job)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Bulk load {} not finished after {:?} (last status {})",
                    job.load_id,
                    timeout,
                    job.status()
                );
                Err(TimeoutError {
                    load_id: job.load_id.clone(),
                    last_status: job.status().to_string(),
                    elapsed: started.elapsed(),
                    last_error: job.last_poll_error().map(str::to_string),
                }
                .into())
            }
        }
    }

    /// Submit and wait.
    pub async fn load(
        &self,
        request: LoadRequest,
        timeout: Duration,
    ) -> Result<(BulkLoadJob, LoadSummary), CompletionError> {
        let mut job = self.submit(request).await?;
        let summary = self.await_completion(&mut job, timeout).await?;
        Ok((job, summary))
    }

    async fn poll_until_terminal(
        &self,
        job: &mut BulkLoadJob,
    ) -> Result<LoadSummary, CompletionError> {
        let interval = self.options.poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            if let Some(outcome) = job.outcome() {
                return outcome.map_err(CompletionError::from);
            }

            match self.poll(job).await {
                Ok(status) if status.is_terminal() => continue,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("Status poll for bulk load {} failed: {}", job.load_id, err);
                    job.record_poll_error(&err);
                }
            }

            tokio::time::sleep(interval).await;
        }
    }
}
