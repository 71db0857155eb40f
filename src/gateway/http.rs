//! Shared HTTP helpers for gateway implementations.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::MarketMindError;

/// Build a pooled client with the given request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, MarketMindError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Map a non-success HTTP status to an error, keeping retry hints.
pub fn status_to_error(status: u16, body: &str) -> MarketMindError {
    match status {
        401 | 403 => MarketMindError::Authentication(body.to_string()),
        429 => MarketMindError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => MarketMindError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
