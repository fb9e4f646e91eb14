use std::future::Future;

use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};

/// Circuit breaker whose state lives in Redis, so every worker process sees
/// the same view of a failing downstream.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state_key(service_name: &str) -> String {
        format!("circuit:{}:state", service_name)
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service_name, suffix)
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.set_state(CircuitState::HalfOpen).await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(Error::internal(format!(
                    "circuit breaker is open for {}",
                    self.service_name
                )))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match operation().await {
            Ok(result) => {
                self.record_success().await?;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await?;
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> Result<CircuitState> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key("state")).await?;
        Ok(CircuitState::from_stored(value.as_deref()))
    }

    async fn set_state(&self, state: CircuitState) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.key("state"), state.as_str())
            .await?;
        Ok(())
    }

    async fn record_success(&self) -> Result<()> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let mut conn = self.connection.clone();
                let successes: u32 = conn.incr(self.key("successes"), 1).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                let mut conn = self.connection.clone();
                conn.del::<_, ()>(self.key("failures")).await?;
            }
            CircuitState::Open => {}
        }
        Ok(())
    }

    async fn record_failure(&self) -> Result<()> {
        if self.state().await? == CircuitState::HalfOpen {
            self.trip().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let failures_key = self.key("failures");
        let failures: u32 = conn.incr(&failures_key, 1).await?;
        conn.expire::<_, ()>(&failures_key, self.config.cooldown.as_secs() as i64)
            .await?;

        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.trip().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }
        Ok(())
    }

    async fn trip(&self) -> Result<()> {
        self.set_state(CircuitState::Open).await?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn reset_counters(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(vec![
            self.key("failures"),
            self.key("successes"),
            self.key("opened_at"),
        ])
        .await?;
        Ok(())
    }

    async fn should_attempt_reset(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let opened_at: Option<i64> = conn.get(self.key("opened_at")).await?;

        Ok(opened_at.is_some_and(|opened_at| {
            let elapsed = Utc::now().timestamp().saturating_sub(opened_at);
            elapsed >= self.config.cooldown.as_secs() as i64
        }))
    }
}
