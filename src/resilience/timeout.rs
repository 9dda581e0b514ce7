//! Bounded timeouts for outbound calls.

use crate::error::HearthError;
use std::time::Duration;

/// Default timeout for outbound device-manager calls (§5).
pub const DEFAULT_DEVICE_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Run `future` with a bounded `duration`, mapping an elapsed deadline onto
/// [`HearthError::Timeout`].
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, HearthError>
where
    F: std::future::Future<Output = Result<T, HearthError>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(HearthError::Timeout {
            duration_ms: duration.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_timeout_error_past_deadline() {
        let result = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, HearthError>(1)
        })
        .await;
        assert!(matches!(result, Err(HearthError::Timeout { .. })));
    }

    #[tokio::test]
    async fn passes_through_fast_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, HearthError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
