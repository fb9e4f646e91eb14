use std::{collections::BTreeMap, fmt::Display, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{models::circuit_breaker::CircuitState, queue::QueueStatsSnapshot};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentCheck {
    pub fn from_probe<E: Display>(result: Result<(), E>, elapsed: Duration) -> Self {
        match result {
            Ok(()) => Self {
                status: HealthStatus::Healthy,
                response_time_ms: Some(elapsed.as_millis() as u64),
                circuit_breaker: None,
                error: None,
            },
            Err(e) => Self::failed(e),
        }
    }

    pub fn failed(error: impl Display) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some(error.to_string()),
        }
    }

    /// A tripped breaker degrades the service without failing it.
    pub fn from_breaker(state: CircuitState) -> Self {
        let (status, error) = match state {
            CircuitState::Closed => (HealthStatus::Healthy, None),
            CircuitState::HalfOpen => (HealthStatus::Degraded, Some("probing recovery")),
            CircuitState::Open => (HealthStatus::Degraded, Some("rejecting calls")),
        };

        Self {
            status,
            response_time_ms: None,
            circuit_breaker: Some(state),
            error: error.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ComponentCheck>,
    pub queue: QueueStatsSnapshot,
}

impl HealthReport {
    /// Unhealthy only when one of `critical` is; any other non-healthy check degrades.
    pub fn new(
        checks: BTreeMap<String, ComponentCheck>,
        critical: &[&str],
        queue: QueueStatsSnapshot,
    ) -> Self {
        let status = if checks
            .iter()
            .any(|(name, c)| c.status == HealthStatus::Unhealthy && critical.contains(&name.as_str()))
        {
            HealthStatus::Unhealthy
        } else if checks.values().any(|c| c.status != HealthStatus::Healthy) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            checks,
            queue,
        }
    }
}
