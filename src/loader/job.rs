//! Bulk load jobs and their state machine
//!
//! `PENDING -> IN_PROGRESS -> {SUCCEEDED, FAILED}`. A job never moves
//! backwards and terminal states are final, whatever the loader reports
//! afterwards.

use crate::error::{ConfigError, LoadError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl LoadStatus {
    /// Map a raw loader status (`LOAD_*`).
    pub fn from_loader(raw: &str) -> Self {
        match raw {
            "LOAD_NOT_STARTED" | "LOAD_IN_QUEUE" => LoadStatus::Pending,
            "LOAD_IN_PROGRESS" => LoadStatus::InProgress,
            "LOAD_COMPLETED" => LoadStatus::Succeeded,
            _ => LoadStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoadStatus::Succeeded | LoadStatus::Failed)
    }

    /// Next state given a reported one.
    pub fn advance(self, reported: LoadStatus) -> LoadStatus {
        if self.is_terminal() || reported < self {
            self
        } else {
            reported
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadStatus::Pending => "PENDING",
            LoadStatus::InProgress => "IN_PROGRESS",
            LoadStatus::Succeeded => "SUCCEEDED",
            LoadStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A graph database loader endpoint, e.g. `https://cluster.example:8182`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderEndpoint {
    base: Url,
}

impl LoaderEndpoint {
    /// Parse an endpoint. A bare `host:port` is assumed to be HTTPS.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };

        let base = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidValue {
            field: "endpoint".to_string(),
            message: format!("{}: {}", raw, e),
        })?;
        if base.host_str().is_none() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint".to_string(),
                message: format!("{} has no host", raw),
            });
        }
        Ok(Self { base })
    }

    /// `<endpoint>/loader`
    pub fn loader_url(&self) -> String {
        format!("{}/loader", self.base.as_str().trim_end_matches('/'))
    }

    /// `<endpoint>/loader/<loadId>`
    pub fn status_url(&self, load_id: &str) -> String {
        format!("{}/{}", self.loader_url(), urlencoding::encode(load_id))
    }
}

impl fmt::Display for LoaderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}

/// `{source, role, region, endpoints}` of a bulk load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Staged file or key prefix the database reads from.
    pub source: String,
    /// Role the database assumes to read `source`.
    pub role_arn: String,
    pub region: String,
    /// Writer endpoint first.
    pub endpoints: Vec<LoaderEndpoint>,
}

impl LoadRequest {
    /// Endpoint requests are sent to.
    pub fn writer(&self) -> Result<&LoaderEndpoint, LoadError> {
        self.endpoints.first().ok_or(LoadError::NoEndpoint)
    }
}

/// Statistics reported by the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub parsing_errors: u64,
    pub datatype_mismatch_errors: u64,
    pub insert_errors: u64,
    pub total_time_secs: u64,
}

/// One poll result as reported by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub raw_status: String,
    pub summary: LoadSummary,
    pub error_detail: Option<String>,
}

/// A submitted bulk load.
#[derive(Debug, Clone)]
pub struct BulkLoadJob {
    pub load_id: String,
    pub request: LoadRequest,
    pub submitted_at: DateTime<Utc>,
    status: LoadStatus,
    raw_status: Option<String>,
    summary: Option<LoadSummary>,
    error_detail: Option<String>,
    last_poll_error: Option<String>,
}

impl BulkLoadJob {
    pub fn new(load_id: &str, request: LoadRequest) -> Self {
        Self {
            load_id: load_id.to_string(),
            request,
            submitted_at: Utc::now(),
            status: LoadStatus::Pending,
            raw_status: None,
            summary: None,
            error_detail: None,
            last_poll_error: None,
        }
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    /// Last `LOAD_*` status seen, if any.
    pub fn raw_status(&self) -> Option<&str> {
        self.raw_status.as_deref()
    }

    pub fn summary(&self) -> Option<&LoadSummary> {
        self.summary.as_ref()
    }

    /// Error of the latest status poll, cleared by the next good one.
    pub fn last_poll_error(&self) -> Option<&str> {
        self.last_poll_error.as_deref()
    }

    /// Note a failed status poll. The job state is left alone: the load was
    /// accepted and may still be running.
    pub fn record_poll_error(&mut self, err: &LoadError) {
        self.last_poll_error = Some(err.to_string());
    }

    /// Fold a poll result into the job. Reports arriving after a terminal
    /// state are ignored.
    pub fn apply(&mut self, report: StatusReport) -> LoadStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        let next = self
            .status
            .advance(LoadStatus::from_loader(&report.raw_status));
        if next != self.status {
            tracing::info!(
                "Bulk load {}: {} -> {} ({})",
                self.load_id,
                self.status,
                next,
                report.raw_status
            );
        }

        self.status = next;
        self.last_poll_error = None;
        self.raw_status = Some(report.raw_status);
        self.summary = Some(report.summary);
        if report.error_detail.is_some() {
            self.error_detail = report.error_detail;
        }
        self.status
    }

    /// Final result once the job is terminal.
    pub fn outcome(&self) -> Option<Result<LoadSummary, LoadError>> {
        match self.status {
            LoadStatus::Succeeded => Some(Ok(self.summary.clone().unwrap_or_default())),
            LoadStatus::Failed => Some(Err(LoadError::Failed {
                load_id: self.load_id.clone(),
                status: self
                    .raw_status
                    .clone()
                    .unwrap_or_else(|| LoadStatus::Failed.to_string()),
                detail: self
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "no detail reported".to_string()),
            })),
            LoadStatus::Pending | LoadStatus::InProgress => None,
        }
    }
}
