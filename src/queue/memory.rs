use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::{Error, Result},
    models::task::{DeadLetter, Task},
    queue::broker::{Broker, Lease, LeaseToken, MaintenanceReport},
};

/// In-process broker for tests and single-binary development setups.
///
/// Tasks are stored serialized, exactly like the networked brokers, so the
/// decode path is the same. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<String>,
    active: HashMap<String, Instant>,
    scheduled: Vec<(Instant, String)>,
    dead: Vec<DeadLetter>,
    closed: bool,
}

impl MemoryState {
    fn promote_due(&mut self, now: Instant) -> usize {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|(ready_at, _)| *ready_at <= now);
        self.scheduled = waiting;

        let promoted = due.len();
        self.pending.extend(due.into_iter().map(|(_, raw)| raw));
        promoted
    }

    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(raw, _)| raw.clone())
            .collect();

        for raw in &expired {
            self.active.remove(raw);
            self.pending.push_front(raw.clone());
        }
        expired.len()
    }

    fn settle(&mut self, lease: &Lease) -> bool {
        match &lease.token {
            LeaseToken::Raw(raw) => self.active.remove(raw).is_some(),
            LeaseToken::DeliveryTag(_) => false,
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("memory broker state poisoned"))
    }

    /// Like `state`, but refuses new work once the broker is closed.
    fn open_state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        let state = self.state()?;
        if state.closed {
            return Err(Error::internal("memory broker is closed"));
        }
        Ok(state)
    }

    /// Enqueues bytes as-is, bypassing task serialization.
    pub fn enqueue_raw(&self, raw: impl Into<String>) -> Result<()> {
        self.open_state()?.pending.push_back(raw.into());
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.state().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state().map(|s| s.active.len()).unwrap_or(0)
    }

    pub fn scheduled_len(&self) -> usize {
        self.state().map(|s| s.scheduled.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, task: &Task) -> Result<()> {
        let raw = serde_json::to_string(task)?;
        self.open_state()?.pending.push_back(raw);
        Ok(())
    }

    async fn lease(&self, lease_timeout: Duration) -> Result<Option<Lease>> {
        let mut state = self.open_state()?;
        let now = Instant::now();
        state.promote_due(now);

        let Some(raw) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.active.insert(raw.clone(), now + lease_timeout);

        let task = serde_json::from_str(&raw).unwrap_or_else(|_| Task::unreadable(raw.as_bytes()));
        Ok(Some(Lease {
            task,
            token: LeaseToken::Raw(raw),
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        if !self.state()?.settle(lease) {
            debug!(task_id = %lease.task.id, "Ack for a lease that is no longer held");
        }
        Ok(())
    }

    async fn retry(&self, lease: &Lease, next: &Task, delay: Duration) -> Result<()> {
        let raw = serde_json::to_string(next)?;
        let mut state = self.state()?;
        state.settle(lease);

        if delay.is_zero() {
            state.pending.push_back(raw);
        } else {
            state.scheduled.push((Instant::now() + delay, raw));
        }
        Ok(())
    }

    async fn dead_letter(&self, lease: &Lease, letter: &DeadLetter) -> Result<()> {
        let mut state = self.state()?;
        state.settle(lease);
        state.dead.push(letter.clone());
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let state = self.state()?;
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }

    async fn maintain(&self) -> Result<MaintenanceReport> {
        let mut state = self.state()?;
        let now = Instant::now();
        Ok(MaintenanceReport {
            promoted: state.promote_due(now),
            reclaimed: state.reclaim_expired(now),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.open_state().map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        self.state()?.closed = true;
        Ok(())
    }
}
