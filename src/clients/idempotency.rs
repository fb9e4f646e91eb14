use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::warn;
use uuid::Uuid;

use crate::{
    clients::DeliveryLedger,
    error::{Error, Result},
    models::{retry::RetryConfig, status::IdempotencyStatus},
    utils::retry_with_backoff,
};

/// Delivery ledger in Redis: one `delivery:{task_id}` key per task, expiring
/// after `ttl_seconds`.
#[derive(Clone)]
pub struct RedisLedger {
    connection: MultiplexedConnection,
    ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisLedger {
    pub fn new(connection: MultiplexedConnection, ttl_seconds: u64, retry_config: RetryConfig) -> Self {
        Self {
            connection,
            ttl_seconds,
            retry_config,
        }
    }

    fn key(task_id: Uuid) -> String {
        format!("delivery:{}", task_id)
    }

    async fn mark(&self, task_id: Uuid, status: IdempotencyStatus) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(Self::key(task_id), status.as_str(), self.ttl_seconds)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryLedger for RedisLedger {
    async fn check(&self, task_id: Uuid) -> Result<IdempotencyStatus> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(Self::key(task_id)).await?;

        let status = IdempotencyStatus::from_stored(value.as_deref());
        if let (Some(stored), IdempotencyStatus::NotFound) = (value.as_deref(), &status) {
            warn!(task_id = %task_id, stored, "Unknown delivery status in ledger");
        }
        Ok(status)
    }

    async fn mark_processing(&self, task_id: Uuid) -> Result<()> {
        self.mark(task_id, IdempotencyStatus::Processing).await
    }

    /// Retried: losing this write means a duplicate email on redelivery.
    async fn mark_sent(&self, task_id: Uuid) -> Result<()> {
        retry_with_backoff(&self.retry_config, || self.mark(task_id, IdempotencyStatus::Sent))
            .await
            .map_err(|e| Error::internal(format!("mark_sent failed: {}", e)))
    }

    async fn mark_failed(&self, task_id: Uuid) -> Result<()> {
        self.mark(task_id, IdempotencyStatus::Failed).await
    }
}
