//! Caller-side timeout wrapper.
//!
//! The store never cancels a transaction on its own; a caller that cannot
//! wait on a locked database wraps the call here and falls back on timeout.

use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

/// Run a store operation, giving up after `timeout`.
pub async fn with_timeout<T, Fut>(timeout: Duration, operation: Fut) -> StoreResult<T>
where
    Fut: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?timeout, "Store operation timed out");
            Err(StoreError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_in_time() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: StoreResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_passes_errors_through() {
        let result: StoreResult<()> = with_timeout(Duration::from_secs(1), async {
            Err(StoreError::constraint("dup"))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }
}
