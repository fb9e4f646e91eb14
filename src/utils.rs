use std::{fmt::Display, future::Future};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Runs `operation` up to `config.max_attempts` times, sleeping with
/// exponential backoff and +/-10% jitter between attempts. Returns the last
/// error once attempts run out.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    max_attempts,
                    error = %e,
                    "Retry failed after exhausting all attempts"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
