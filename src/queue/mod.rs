//! Topic-routed task queue.
//!
//! Producers push [`Event`]s through an [`EventProducer`]; a fixed pool of
//! workers leases the resulting tasks from a [`Broker`] and runs the handler
//! registered for the event's topic. Delivery is at-least-once: a failing
//! handler is retried with exponential backoff and dead-lettered once its
//! retry budget is spent, so handlers must tolerate duplicates.
//!
//! Handlers are registered on an [`EventQueueBuilder`], which is consumed by
//! [`EventQueueBuilder::build`]; a running queue has no way to add handlers.

pub mod broker;
pub mod memory;
mod worker;

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::{sync::watch, task::JoinSet, time::timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::{
        event::{Delivery, Event},
        retry::RetryConfig,
        task::{DeadLetter, Task},
        topic::Topic,
    },
};

pub use broker::{Broker, Lease, LeaseToken, MaintenanceReport};
pub use memory::MemoryBroker;

use worker::Worker;

pub type Handler = Arc<dyn Fn(Delivery) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub handler_timeout: Duration,
    /// Must comfortably exceed `handler_timeout`, or a slow but healthy task
    /// gets reclaimed and runs twice.
    pub lease_timeout: Duration,
    pub maintenance_interval: Duration,
    pub max_retries: u32,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(4),
            handler_timeout: Duration::from_secs(30),
            lease_timeout: Duration::from_secs(60),
            maintenance_interval: Duration::from_secs(5),
            max_retries: 5,
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 1_000,
                max_delay_ms: 60_000,
                backoff_multiplier: 2,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub succeeded: u64,
    /// Failed handler invocations, including those later retried.
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl QueueStats {
    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable push side of the queue, safe to share across request handlers.
#[derive(Clone)]
pub struct EventProducer {
    broker: Arc<dyn Broker>,
    stats: Arc<QueueStats>,
}

impl EventProducer {
    /// Enqueues `event` and returns the task id once the broker has accepted
    /// it. Says nothing about when, or whether, the event gets processed.
    pub async fn push(&self, event: &Event) -> Result<Uuid> {
        let task = Task::from_event(event)?;
        self.broker.enqueue(&task).await?;
        self.stats.record_enqueued();

        debug!(task_id = %task.id, topic = %task.topic, "Event enqueued");
        Ok(task.id)
    }

    /// Validates a wire-level `(topic, payload)` pair and enqueues it.
    pub async fn push_parts(&self, topic: &str, payload: JsonValue) -> Result<Uuid> {
        let event = Event::from_parts(topic, payload)?;
        self.push(&event).await
    }
}

pub struct EventQueueBuilder {
    broker: Arc<dyn Broker>,
    config: QueueConfig,
    handlers: HashMap<Topic, Handler>,
}

impl EventQueueBuilder {
    /// Binds `handler` to `topic`, replacing any earlier registration.
    pub fn register<F, Fut>(mut self, topic: Topic, handler: F) -> Self
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |delivery| -> BoxFuture<'static, Result<()>> {
            Box::pin(handler(delivery))
        });
        if self.handlers.insert(topic, boxed).is_some() {
            warn!(topic = %topic, "Handler registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> EventQueue {
        EventQueue {
            broker: self.broker,
            config: self.config,
            handlers: Arc::new(self.handlers),
            stats: Arc::new(QueueStats::default()),
            running: None,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    workers: JoinSet<()>,
}

pub struct EventQueue {
    broker: Arc<dyn Broker>,
    config: QueueConfig,
    handlers: Arc<HashMap<Topic, Handler>>,
    stats: Arc<QueueStats>,
    running: Option<Running>,
}

impl EventQueue {
    pub fn builder(broker: Arc<dyn Broker>, config: QueueConfig) -> EventQueueBuilder {
        EventQueueBuilder {
            broker,
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn producer(&self) -> EventProducer {
        EventProducer {
            broker: Arc::clone(&self.broker),
            stats: Arc::clone(&self.stats),
        }
    }

    pub async fn push(&self, event: &Event) -> Result<Uuid> {
        self.producer().push(event).await
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.broker.dead_letters(limit).await
    }

    /// Starts the worker pool and the maintenance janitor. Must be called
    /// from within a tokio runtime.
    pub fn open(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::invalid("event queue is already open"));
        }
        if self.handlers.is_empty() {
            return Err(Error::invalid("no handlers registered"));
        }
        if self.config.concurrency == 0 {
            return Err(Error::invalid("worker concurrency must be at least 1"));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut workers = JoinSet::new();

        for id in 0..self.config.concurrency {
            let worker = Worker {
                id,
                broker: Arc::clone(&self.broker),
                handlers: Arc::clone(&self.handlers),
                config: self.config.clone(),
                stats: Arc::clone(&self.stats),
                shutdown: shutdown_rx.clone(),
            };
            workers.spawn(worker.run());
        }

        workers.spawn(janitor(
            Arc::clone(&self.broker),
            self.config.maintenance_interval,
            shutdown_rx,
        ));

        info!(
            broker = self.broker.name(),
            concurrency = self.config.concurrency,
            topics = ?self.handlers.keys().map(|t| t.as_str()).collect::<Vec<_>>(),
            "Event queue opened"
        );

        self.running = Some(Running { shutdown, workers });
        Ok(())
    }

    /// Stops leasing, waits up to the shutdown grace period for in-flight
    /// handlers, then releases the broker. Tasks abandoned at the deadline
    /// stay leased and are handed out again once their lease expires.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut running) = self.running.take() {
            let _ = running.shutdown.send(true);

            let drained = timeout(self.config.shutdown_timeout, async {
                while let Some(joined) = running.workers.join_next().await {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Worker panicked");
                        }
                    }
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    abandoned = running.workers.len(),
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "Shutdown grace period elapsed, abandoning in-flight tasks"
                );
                running.workers.shutdown().await;
            }

            info!(stats = ?self.stats.snapshot(), "Event queue closed");
        }

        self.broker.close().await
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn janitor(broker: Arc<dyn Broker>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        match broker.maintain().await {
            Ok(report) if !report.is_empty() => info!(
                promoted = report.promoted,
                reclaimed = report.reclaimed,
                "Broker maintenance moved tasks"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Broker maintenance failed"),
        }
    }
}
