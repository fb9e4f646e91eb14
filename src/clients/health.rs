use std::{collections::BTreeMap, sync::Arc, time::Instant};

use redis::{AsyncCommands, aio::MultiplexedConnection};
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, database::DatabaseClient},
    error::Result,
    models::{
        circuit_breaker::CircuitState,
        health::{ComponentCheck, HealthReport},
    },
    queue::{Broker, QueueStats},
};

/// Checks that fail the whole service when unhealthy.
const CRITICAL: [&str; 2] = ["database", "message_broker"];

pub struct HealthChecker {
    database: DatabaseClient,
    broker: Arc<dyn Broker>,
    redis: Option<MultiplexedConnection>,
    circuit_breakers: Vec<String>,
    stats: Arc<QueueStats>,
}

impl HealthChecker {
    pub fn new(database: DatabaseClient, broker: Arc<dyn Broker>, stats: Arc<QueueStats>) -> Self {
        Self {
            database,
            broker,
            redis: None,
            circuit_breakers: Vec::new(),
            stats,
        }
    }

    /// Adds the cache check and reports the state of the named breakers.
    pub fn with_redis(mut self, connection: MultiplexedConnection, circuit_breakers: Vec<String>) -> Self {
        self.redis = Some(connection);
        self.circuit_breakers = circuit_breakers;
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut checks = BTreeMap::new();

        let start = Instant::now();
        let database = self.database.health_check().await;
        if let Err(e) = &database {
            warn!(error = %e, "Database health check failed");
        }
        checks.insert("database".to_string(), ComponentCheck::from_probe(database, start.elapsed()));

        let start = Instant::now();
        let broker = self.broker.ping().await;
        if let Err(e) = &broker {
            warn!(broker = self.broker.name(), error = %e, "Broker health check failed");
        }
        checks.insert("message_broker".to_string(), ComponentCheck::from_probe(broker, start.elapsed()));

        if let Some(connection) = &self.redis {
            let mut conn = connection.clone();
            let start = Instant::now();
            let ping = conn.ping::<String>().await.map(|_| ());
            checks.insert("cache_service".to_string(), ComponentCheck::from_probe(ping, start.elapsed()));

            for service in &self.circuit_breakers {
                let check = match circuit_state(&mut conn, service).await {
                    Ok(state) => ComponentCheck::from_breaker(state),
                    Err(e) => {
                        warn!(service, error = %e, "Failed to read circuit breaker state");
                        ComponentCheck::failed(e)
                    }
                };
                checks.insert(service.clone(), check);
            }
        }

        let report = HealthReport::new(checks, &CRITICAL, self.stats.snapshot());
        debug!(status = ?report.status, "Health check finished");
        report
    }
}

async fn circuit_state(conn: &mut MultiplexedConnection, service: &str) -> Result<CircuitState> {
    let value: Option<String> = conn.get(CircuitBreaker::state_key(service)).await?;
    Ok(CircuitState::from_stored(value.as_deref()))
}
