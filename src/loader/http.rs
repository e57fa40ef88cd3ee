//! HTTP client for the graph database loader endpoint

use super::job::{LoadRequest, LoadSummary, LoaderEndpoint, StatusReport};
use crate::error::LoadError;
use crate::http::{build_client, sanitize_for_log};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Number of error log entries folded into a failure detail.
const MAX_ERROR_LOGS: usize = 5;

/// Loader parallelism hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Parallelism {
    Low,
    #[default]
    Medium,
    High,
    Oversubscribe,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    source: &'a str,
    format: &'static str,
    iam_role_arn: &'a str,
    region: &'a str,
    fail_on_error: &'static str,
    parallelism: Parallelism,
    update_single_cardinality_properties: &'static str,
    queue_request: &'static str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    payload: SubmitPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPayload {
    load_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    payload: StatusPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    overall_status: OverallStatus,
    #[serde(default)]
    errors: Option<ErrorPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverallStatus {
    status: String,
    #[serde(default)]
    total_records: u64,
    #[serde(default)]
    total_duplicates: u64,
    #[serde(default)]
    parsing_errors: u64,
    #[serde(default)]
    datatype_mismatch_errors: u64,
    #[serde(default)]
    insert_errors: u64,
    #[serde(default)]
    total_time_spent: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPage {
    #[serde(default)]
    error_logs: Vec<ErrorLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLog {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    record_num: Option<u64>,
}

impl ErrorLog {
    fn describe(&self) -> String {
        let mut line = String::new();
        if let Some(code) = &self.error_code {
            line.push_str(code);
        }
        if let Some(message) = &self.error_message {
            if !line.is_empty() {
                line.push_str(": ");
            }
            line.push_str(message);
        }
        if let Some(record) = self.record_num {
            line.push_str(&format!(" (record {})", record));
        }
        line
    }
}

/// Error body returned on rejected requests.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detailed_message: Option<String>,
}

/// Raw loader protocol calls.
#[derive(Clone)]
pub struct LoaderClient {
    client: Client,
}

impl LoaderClient {
    pub fn new() -> Result<Self, LoadError> {
        Ok(Self {
            client: build_client()?,
        })
    }

    /// `POST <endpoint>/loader`, returning the load id.
    pub async fn submit(
        &self,
        endpoint: &LoaderEndpoint,
        request: &LoadRequest,
        parallelism: Parallelism,
    ) -> Result<String, LoadError> {
        let url = endpoint.loader_url();
        tracing::debug!("POST {}", url);

        let body = SubmitBody {
            source: &request.source,
            format: "csv",
            iam_role_arn: &request.role_arn,
            region: &request.region,
            fail_on_error: "TRUE",
            parallelism,
            update_single_cardinality_properties: "FALSE",
            queue_request: "TRUE",
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let text = checked_body(response).await?;

        let parsed: SubmitResponse = serde_json::from_str(&text)
            .map_err(|e| LoadError::Protocol(format!("submit response: {}", e)))?;
        Ok(parsed.payload.load_id)
    }

    /// `GET <endpoint>/loader/<loadId>?details=true&errors=true`
    pub async fn status(
        &self,
        endpoint: &LoaderEndpoint,
        load_id: &str,
    ) -> Result<StatusReport, LoadError> {
        let url = endpoint.status_url(load_id);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("details", "true"), ("errors", "true")])
            .send()
            .await?;
        let text = checked_body(response).await?;

        let parsed: StatusResponse = serde_json::from_str(&text)
            .map_err(|e| LoadError::Protocol(format!("status response: {}", e)))?;
        Ok(into_report(parsed.payload))
    }
}

async fn checked_body(response: reqwest::Response) -> Result<String, LoadError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
        tracing::error!("Loader error: {} - {}", status, sanitize_for_log(&text));
        let detail = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody {
                code,
                detailed_message: Some(message),
            }) => match code {
                Some(code) => format!("{}: {}", code, sanitize_for_log(&message)),
                None => sanitize_for_log(&message),
            },
            _ => sanitize_for_log(&text),
        };
        return Err(LoadError::Rejected {
            status: status.as_u16(),
            detail,
        });
    }

    Ok(text)
}

fn into_report(payload: StatusPayload) -> StatusReport {
    let overall = payload.overall_status;
    let error_detail = payload.errors.and_then(|page| {
        let lines: Vec<String> = page
            .error_logs
            .iter()
            .take(MAX_ERROR_LOGS)
            .map(ErrorLog::describe)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("; "))
        }
    });

    StatusReport {
        raw_status: overall.status,
        summary: LoadSummary {
            rows_processed: overall.total_records,
            rows_skipped: overall.total_duplicates,
            parsing_errors: overall.parsing_errors,
            datatype_mismatch_errors: overall.datatype_mismatch_errors,
            insert_errors: overall.insert_errors,
            total_time_secs: overall.total_time_spent,
        },
        error_detail,
    }
}
