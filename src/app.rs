//! Composition root: builds every collaborator from [`Config`] and owns the
//! queue lifecycle.

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use crate::{
    api::{self, AppState},
    clients::{
        DeliveryLedger, EmailSender,
        circuit_breaker::CircuitBreaker,
        database::DatabaseClient,
        directory::SqliteDirectory,
        email::{EmailSettings, HttpEmailClient, LogEmailSender},
        health::HealthChecker,
        idempotency::RedisLedger,
        rbmq::{RabbitMqBroker, RabbitMqSettings},
        redis::{self as redis_client, RedisBroker},
    },
    config::Config,
    dispatch::NotificationDispatcher,
    notifier::Notifier,
    queue::{Broker, EventQueue, MemoryBroker},
    store::SubscriptionStore,
};

const EMAIL_SERVICE: &str = "email";

pub struct App {
    config: Config,
    database: DatabaseClient,
    queue: EventQueue,
    notifier: Notifier,
    dispatcher: Arc<NotificationDispatcher>,
    state: Arc<AppState>,
}

impl App {
    pub async fn build(config: Config) -> Result<Self, Error> {
        let database = DatabaseClient::connect(&config.database_url).await?;
        let store = SubscriptionStore::new(database.pool());
        let directory = Arc::new(SqliteDirectory::new(database.pool()));

        let redis = match &config.redis_url {
            Some(url) => Some(redis_client::connect(url).await?),
            None => {
                warn!("REDIS_URL not set, running without delivery ledger or circuit breaker");
                None
            }
        };

        let broker = connect_broker(&config).await?;
        let email = build_email_sender(&config, redis.clone());

        let mut dispatcher = NotificationDispatcher::new(
            store.clone(),
            directory.clone(),
            directory.clone(),
            email,
            config.frontend_url.clone(),
        );
        if let Some(connection) = &redis {
            let ledger: Arc<dyn DeliveryLedger> = Arc::new(RedisLedger::new(
                connection.clone(),
                config.idempotency_ttl_seconds,
                config.retry_config(),
            ));
            dispatcher = dispatcher.with_ledger(ledger);
        }
        let dispatcher = Arc::new(dispatcher);

        let builder = EventQueue::builder(Arc::clone(&broker), config.queue_config());
        let queue = dispatcher.register(builder).build();

        let notifier = Notifier::new(queue.producer(), store.clone(), directory);

        let mut health_checker =
            HealthChecker::new(database.clone(), Arc::clone(&broker), queue.stats_handle());
        if let Some(connection) = redis {
            health_checker = health_checker.with_redis(connection, vec![EMAIL_SERVICE.to_string()]);
        }

        let state = Arc::new(AppState {
            producer: queue.producer(),
            store,
            broker,
            health_checker,
        });

        info!("Application components initialized");

        Ok(Self {
            config,
            database,
            queue,
            notifier,
            dispatcher,
            state,
        })
    }

    /// In-process entry point for the CRUD layer.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Opens the queue, serves HTTP until ctrl-c, then drains the queue.
    pub async fn run(mut self) -> Result<(), Error> {
        self.queue.open()?;

        let served = api::run_api_server(Arc::clone(&self.state), self.config.server_port, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await;

        self.queue.close().await?;
        self.database.close().await;

        info!(
            queue = ?self.queue.stats(),
            dispatch = ?self.dispatcher.stats(),
            "Shutdown complete"
        );
        served
    }
}

async fn connect_broker(config: &Config) -> Result<Arc<dyn Broker>, Error> {
    let url = config.broker_url.as_str();
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| anyhow!("BROKER_URL has no scheme: {}", url))?;

    let broker: Arc<dyn Broker> = match scheme {
        "redis" | "rediss" => Arc::new(RedisBroker::connect(url, &config.queue_name).await?),
        "amqp" | "amqps" => Arc::new(
            RabbitMqBroker::connect(&RabbitMqSettings {
                url: url.to_string(),
                queue_name: config.queue_name.clone(),
                failed_queue_name: config.failed_queue_name.clone(),
                prefetch_count: config.prefetch_count,
                receive_timeout: Duration::from_millis(config.poll_interval_ms),
            })
            .await?,
        ),
        "memory" => {
            warn!("Using the in-memory broker, queued events do not survive a restart");
            Arc::new(MemoryBroker::new())
        }
        other => return Err(anyhow!("Unsupported broker scheme: {}", other)),
    };

    info!(broker = broker.name(), "Broker connected");
    Ok(broker)
}

fn build_email_sender(config: &Config, redis: Option<MultiplexedConnection>) -> Arc<dyn EmailSender> {
    let Some(api_url) = &config.email_api_url else {
        warn!("EMAIL_API_URL not set, notifications will only be logged");
        return Arc::new(LogEmailSender);
    };

    let circuit_breaker = redis.map(|connection| {
        CircuitBreaker::new(EMAIL_SERVICE, connection, config.circuit_breaker_config())
    });

    Arc::new(HttpEmailClient::new(
        EmailSettings {
            api_url: api_url.clone(),
            api_token: config.email_api_token.clone(),
            from: config.email_from.clone(),
        },
        config.retry_config(),
        circuit_breaker,
    ))
}
