use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;

/// Runs a storage operation under a deadline.
///
/// An elapsed deadline drops the inner future and surfaces as
/// [`StorageError::Timeout`] naming the operation.
pub async fn with_deadline<T, F>(operation: &'static str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(format!(
            "{operation} exceeded {}ms",
            deadline.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn passes_through_fast_operations() {
        let value = with_deadline("get", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let err = with_deadline("insert", Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        match err {
            StorageError::Timeout(message) => assert_eq!(message, "insert exceeded 2000ms"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_are_kept() {
        let err = with_deadline::<(), _>("get", Duration::from_secs(1), async {
            Err(StorageError::Query("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Query(_)));
    }
}
