use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based), capped at `max_delay_ms`,
    /// with +/-10% jitter so a burst of failures does not retry in lockstep.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let mut delay_ms = self.initial_delay_ms;
        for _ in 1..retry {
            delay_ms = delay_ms
                .saturating_mul(self.backoff_multiplier)
                .min(self.max_delay_ms);
        }
        let delay_ms = delay_ms.min(self.max_delay_ms);

        let jitter = rand::random_range(-0.1..=0.1);
        Duration::from_millis((delay_ms as f64 * (1.0 + jitter)) as u64)
    }
}
