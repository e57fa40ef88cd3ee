//! HTTP utilities shared by the describer and the loader client

use reqwest::Client;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request timeout. Polling timeouts are handled by the loader itself.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client used for every outbound call.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("resgraph/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
}

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let char_count = body.chars().count();
    let truncated = if char_count > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}
