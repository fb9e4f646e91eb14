use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig},
    queue::QueueConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: String,

    /// `redis://`, `rediss://`, `amqp://`, `amqps://` or `memory://`.
    pub broker_url: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    /// Enables the delivery ledger and the shared circuit breaker.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
    #[serde(default = "default_handler_timeout_seconds")]
    pub handler_timeout_seconds: u64,
    #[serde(default = "default_lease_timeout_seconds")]
    pub lease_timeout_seconds: u64,
    #[serde(default = "default_maintenance_interval_seconds")]
    pub maintenance_interval_seconds: u64,
    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    /// Without it, notifications are only logged.
    #[serde(default)]
    pub email_api_url: Option<String>,
    #[serde(default)]
    pub email_api_token: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,

    pub frontend_url: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_queue_name() -> String {
    "blog_notifications".to_string()
}

fn default_failed_queue_name() -> String {
    "blog_notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_seconds() -> u64 {
    4
}

fn default_handler_timeout_seconds() -> u64 {
    30
}

fn default_lease_timeout_seconds() -> u64 {
    60
}

fn default_maintenance_interval_seconds() -> u64 {
    5
}

fn default_max_task_retries() -> u32 {
    5
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}

fn default_circuit_breaker_success_threshold() -> u32 {
    2
}

fn default_email_from() -> String {
    "notifications@localhost".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environment variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.lease_timeout_seconds <= self.handler_timeout_seconds {
            return Err(anyhow!(
                "LEASE_TIMEOUT_SECONDS ({}) must exceed HANDLER_TIMEOUT_SECONDS ({})",
                self.lease_timeout_seconds,
                self.handler_timeout_seconds
            ));
        }
        Ok(())
    }

    /// Backoff for in-process retries of a single downstream call.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            cooldown: Duration::from_secs(self.circuit_breaker_timeout_seconds),
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
            lease_timeout: Duration::from_secs(self.lease_timeout_seconds),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_seconds),
            max_retries: self.max_task_retries,
            retry: RetryConfig {
                max_attempts: self.max_task_retries,
                ..self.retry_config()
            },
        }
    }
}
