//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::MarketMindError;

/// Wrap a future with a timeout. A zero duration disables the limit.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, MarketMindError>>,
) -> Result<T, MarketMindError> {
    if duration.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(MarketMindError::Timeout(duration.as_millis() as u64)),
    }
}
