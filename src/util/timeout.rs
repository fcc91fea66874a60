//! Deadline helpers.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CadenceError;

/// Wrap a future with a deadline.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, CadenceError>>,
) -> Result<T, CadenceError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(CadenceError::Timeout(duration.as_millis() as u64)),
    }
}

/// Run `future` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T, CadenceError>>,
) -> Result<T, CadenceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CadenceError::Cancelled),
        result = future => result,
    }
}
