//! Async utilities

use crate::error::{CaltrackError, CaltrackResult, ErrorContext};
use tokio::time::{timeout, Duration};

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> CaltrackResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(CaltrackError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Increase timeout duration")
                .with_suggestion("Check network connectivity"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let value = with_timeout(async { 7 }, 100, "quick").await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_future_times_out() {
        let result = with_timeout(
            tokio::time::sleep(Duration::from_secs(60)),
            50,
            "slow_probe",
        )
        .await;

        match result {
            Err(CaltrackError::Timeout {
                operation,
                duration_ms,
                ..
            }) => {
                assert_eq!(operation, "slow_probe");
                assert_eq!(duration_ms, 50);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
