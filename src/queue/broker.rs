use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::Result,
    models::task::{DeadLetter, Task},
};

/// Broker-specific handle identifying a leased task, needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseToken {
    /// The serialized task exactly as stored in a list-based broker.
    Raw(String),
    /// AMQP delivery tag on the consuming channel.
    DeliveryTag(u64),
}

/// A task claimed by one worker. Until it is settled with `ack`, `retry` or
/// `dead_letter` no other worker receives it; if the lease expires first the
/// broker hands it out again.
#[derive(Debug, Clone)]
pub struct Lease {
    pub task: Task,
    pub token: LeaseToken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Retries whose backoff elapsed and were made leasable again.
    pub promoted: usize,
    /// Leases that expired without being settled and were put back.
    pub reclaimed: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.promoted == 0 && self.reclaimed == 0
    }
}

/// Durable at-least-once transport underneath the event queue.
///
/// Only the queue talks to a broker; producers and handlers never see tasks.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns once the task is durably accepted.
    async fn enqueue(&self, task: &Task) -> Result<()>;

    /// Claims the next ready task, if any, for at most `lease_timeout`.
    /// Never blocks waiting for work.
    async fn lease(&self, lease_timeout: Duration) -> Result<Option<Lease>>;

    async fn ack(&self, lease: &Lease) -> Result<()>;

    /// Settles `lease` and schedules `next` (the same task with its retry
    /// count bumped) to become leasable after `delay`.
    async fn retry(&self, lease: &Lease, next: &Task, delay: Duration) -> Result<()>;

    async fn dead_letter(&self, lease: &Lease, letter: &DeadLetter) -> Result<()>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    /// Housekeeping run periodically by the queue.
    async fn maintain(&self) -> Result<MaintenanceReport> {
        Ok(MaintenanceReport::default())
    }

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
