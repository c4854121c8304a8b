//! JSON POST with retry and exponential backoff, shared by the embedding
//! and chat clients.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;

/// A JSON POST request to an upstream API.
pub struct JsonRequest<'a> {
    /// Name used in error messages, e.g. `"OpenAI"`.
    pub service: &'a str,
    pub url: &'a str,
    pub headers: Vec<(&'static str, String)>,
    pub body: &'a serde_json::Value,
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Whether a response status is worth retrying.
pub fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Send `request`, retrying transient failures up to `max_retries` times.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    request: &JsonRequest<'_>,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            tracing::warn!(
                service = request.service,
                attempt,
                delay_secs = delay.as_secs(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        let mut builder = client
            .post(request.url)
            .header("Content-Type", "application/json")
            .json(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if is_retryable(status) {
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        request.service,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", request.service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "{} connection error ({}): {}",
                    request.service,
                    request.url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", request.service)))
}
