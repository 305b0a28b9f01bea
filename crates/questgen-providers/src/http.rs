//! HTTP plumbing shared by the hosted completion backends.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::ProviderError;

pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Retry hint used when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub(crate) fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client")
}

/// Map a transport failure onto a provider error.
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(DEFAULT_TIMEOUT_SECS)
    } else {
        ProviderError::NetworkError(e.to_string())
    }
}

/// Turn a non-success response into a provider error.
///
/// `error_message` pulls the human-readable message out of the backend's
/// JSON error body, falling back to the raw body.
pub(crate) async fn status_error(
    response: reqwest::Response,
    model: &str,
    error_message: fn(&str) -> Option<String>,
) -> ProviderError {
    let status = response.status().as_u16();
    match status {
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            ProviderError::RateLimited {
                retry_after_ms: retry_after * 1000,
            }
        }
        401 | 403 => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::AuthenticationFailed(error_message(&body).unwrap_or(body))
        }
        404 => ProviderError::ModelNotFound(model.to_string()),
        _ => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::ApiError {
                status,
                message: error_message(&body).unwrap_or(body),
            }
        }
    }
}
