//! Retry with exponential backoff.

use crate::error::HearthError;
use std::time::Duration;
use tokio::time::sleep;

const MAX_DELAY_MS: u64 = 5_000;
const MULTIPLIER: f64 = 2.0;

/// Retry `f` up to `attempts` times (the first call plus `attempts - 1`
/// retries), doubling the delay after each failure starting from
/// `base_delay_ms`, capped at 5s. Throws the last error if all attempts fail.
pub async fn retry_with_backoff<F, Fut, T>(
    attempts: u32,
    base_delay_ms: u64,
    mut f: F,
) -> Result<T, HearthError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, HearthError>>,
{
    let mut delay = Duration::from_millis(base_delay_ms);
    let mut last_error = None;

    for attempt in 0..attempts.max(1) {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retryable = e.is_recoverable();
                last_error = Some(e);
                if attempt + 1 < attempts && retryable {
                    sleep(delay).await;
                    delay = Duration::from_millis(
                        ((delay.as_millis() as f64 * MULTIPLIER) as u64).min(MAX_DELAY_MS),
                    );
                } else {
                    break;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| HearthError::Internal("retry exhausted without error".into())))
}
