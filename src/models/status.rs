use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// What a dispatcher did with one event. Every variant is a success as far as
/// the queue is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    NoSubscribers,
    NoRecipients,
    AlreadySent,
    Sent { recipients: usize },
}

/// State of a task in the delivery ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    NotFound,
    Processing,
    Sent,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::NotFound => "not_found",
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Sent => "sent",
            IdempotencyStatus::Failed => "failed",
        }
    }

    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("processing") => IdempotencyStatus::Processing,
            Some("sent") => IdempotencyStatus::Sent,
            Some("failed") => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::NotFound,
        }
    }
}

impl Display for DispatchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DispatchOutcome::NoSubscribers => write!(f, "no_subscribers"),
            DispatchOutcome::NoRecipients => write!(f, "no_recipients"),
            DispatchOutcome::AlreadySent => write!(f, "already_sent"),
            DispatchOutcome::Sent { recipients } => write!(f, "sent({})", recipients),
        }
    }
}
