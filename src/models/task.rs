use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{error::Result, models::event::Event};

/// Broker-level envelope around an [`Event`].
///
/// `topic` stays a plain string on the wire: a task written by a newer or
/// buggy producer must still be readable so it can be dead-lettered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub topic: String,
    pub payload: JsonValue,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    pub(crate) fn from_event(event: &Event) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: event.topic().as_str().to_string(),
            payload: event.payload().without_snapshot().to_json()?,
            enqueued_at: Utc::now(),
            retry_count: 0,
        })
    }

    /// Wraps bytes that could not be parsed as a task, so they can be
    /// dead-lettered instead of silently dropped.
    pub(crate) fn unreadable(raw: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: String::new(),
            payload: JsonValue::String(String::from_utf8_lossy(raw).into_owned()),
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Terminal record of a task that will not be delivered again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(task: Task, failure_reason: impl Into<String>) -> Self {
        Self {
            task,
            failure_reason: failure_reason.into(),
            failed_at: Utc::now(),
        }
    }
}
