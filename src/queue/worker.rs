use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures_util::FutureExt;
use tokio::{
    sync::watch,
    time::{Instant, sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    models::{
        event::{Delivery, Event},
        task::{DeadLetter, Task},
        topic::Topic,
    },
    queue::{
        Handler, QueueConfig, QueueStats,
        broker::{Broker, Lease},
    },
};

pub(crate) struct Worker {
    pub id: usize,
    pub broker: Arc<dyn Broker>,
    pub handlers: Arc<HashMap<Topic, Handler>>,
    pub config: QueueConfig,
    pub stats: Arc<QueueStats>,
    pub shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub async fn run(mut self) {
        debug!(worker = self.id, "Worker started");

        while !*self.shutdown.borrow() {
            match self.broker.lease(self.config.lease_timeout).await {
                Ok(Some(lease)) => self.process(lease).await,
                Ok(None) => {
                    if self.idle(self.config.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Failed to lease task");
                    if self.idle(self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }

    /// Sleeps for `period` unless shutdown is signalled first; returns whether
    /// the worker should stop.
    async fn idle(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = sleep(period) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }

    async fn process(&self, lease: Lease) {
        let task = &lease.task;
        let started = Instant::now();

        match self.invoke(task).await {
            Ok(()) => {
                if let Err(e) = self.broker.ack(&lease).await {
                    error!(task_id = %task.id, error = %e, "Failed to acknowledge task");
                }
                self.stats.record_success();
                info!(
                    task_id = %task.id,
                    topic = %task.topic,
                    attempt = task.retry_count + 1,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task processed"
                );
            }
            Err(e) if !e.is_retryable() => {
                self.stats.record_failure();
                self.bury(&lease, format!("permanent failure: {}", e)).await;
            }
            Err(e) if task.retry_count >= self.config.max_retries => {
                self.stats.record_failure();
                self.bury(
                    &lease,
                    format!(
                        "retry budget exhausted after {} attempts: {}",
                        task.retry_count + 1,
                        e
                    ),
                )
                .await;
            }
            Err(e) => {
                self.stats.record_failure();
                let next = task.next_attempt();
                let delay = self.config.retry.delay_for(next.retry_count);

                warn!(
                    task_id = %task.id,
                    topic = %task.topic,
                    attempt = task.retry_count + 1,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed, scheduling retry"
                );

                match self.broker.retry(&lease, &next, delay).await {
                    Ok(()) => self.stats.record_retry(),
                    Err(e) => error!(
                        task_id = %task.id,
                        error = %e,
                        "Failed to schedule retry, task will be redelivered when its lease expires"
                    ),
                }
            }
        }
    }

    async fn invoke(&self, task: &Task) -> Result<()> {
        let event = Event::from_parts(&task.topic, task.payload.clone())?;
        let topic = event.topic();

        let handler = self
            .handlers
            .get(&topic)
            .cloned()
            .ok_or_else(|| Error::invalid_topic(format!("{} (no handler registered)", topic)))?;

        let delivery = Delivery {
            task_id: task.id,
            attempt: task.retry_count + 1,
            event,
        };

        let invocation = AssertUnwindSafe(async move { handler(delivery).await }).catch_unwind();

        match timeout(self.config.handler_timeout, invocation).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(Error::internal(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(Error::internal(format!(
                "handler timed out after {}ms",
                self.config.handler_timeout.as_millis()
            ))),
        }
    }

    async fn bury(&self, lease: &Lease, reason: String) {
        let letter = DeadLetter::new(lease.task.clone(), reason);

        error!(
            task_id = %letter.task.id,
            topic = %letter.task.topic,
            attempts = letter.task.retry_count + 1,
            reason = %letter.failure_reason,
            "Task dead-lettered"
        );

        match self.broker.dead_letter(lease, &letter).await {
            Ok(()) => self.stats.record_dead_letter(),
            Err(e) => error!(
                task_id = %letter.task.id,
                error = %e,
                "Failed to dead-letter task, it will be redelivered when its lease expires"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
