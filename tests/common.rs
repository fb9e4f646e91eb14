use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use blog_notifier::{
    clients::{DeliveryLedger, EmailSender, database::DatabaseClient, directory::SqliteDirectory},
    dispatch::NotificationDispatcher,
    error::{Error, Result as NotifierResult},
    models::{retry::RetryConfig, status::IdempotencyStatus},
    queue::QueueConfig,
    store::SubscriptionStore,
};
use sqlx::SqlitePool;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

pub const FRONTEND_URL: &str = "https://blog.example.com";

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: Vec<String>,
    pub body: String,
    pub subject: String,
}

/// Records every message; the first `failures` sends fail.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    failures: AtomicU32,
}

impl RecordingEmailSender {
    pub fn failing(failures: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &[String], body: &str, subject: &str) -> NotifierResult<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::internal("mail provider unavailable"));
        }

        self.sent
            .lock()
            .map_err(|_| Error::internal("poisoned"))?
            .push(SentEmail {
                to: to.to_vec(),
                body: body.to_string(),
                subject: subject.to_string(),
            });
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<Uuid, IdempotencyStatus>>,
}

impl InMemoryLedger {
    fn set(&self, task_id: Uuid, status: IdempotencyStatus) -> NotifierResult<()> {
        self.entries
            .lock()
            .map_err(|_| Error::internal("poisoned"))?
            .insert(task_id, status);
        Ok(())
    }

    pub fn status(&self, task_id: Uuid) -> IdempotencyStatus {
        self.entries
            .lock()
            .ok()
            .and_then(|e| e.get(&task_id).cloned())
            .unwrap_or(IdempotencyStatus::NotFound)
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn check(&self, task_id: Uuid) -> NotifierResult<IdempotencyStatus> {
        Ok(self.status(task_id))
    }

    async fn mark_processing(&self, task_id: Uuid) -> NotifierResult<()> {
        self.set(task_id, IdempotencyStatus::Processing)
    }

    async fn mark_sent(&self, task_id: Uuid) -> NotifierResult<()> {
        self.set(task_id, IdempotencyStatus::Sent)
    }

    async fn mark_failed(&self, task_id: Uuid) -> NotifierResult<()> {
        self.set(task_id, IdempotencyStatus::Failed)
    }
}

/// Ledger that is always down.
pub struct BrokenLedger;

#[async_trait]
impl DeliveryLedger for BrokenLedger {
    async fn check(&self, _task_id: Uuid) -> NotifierResult<IdempotencyStatus> {
        Err(Error::internal("ledger offline"))
    }

    async fn mark_processing(&self, _task_id: Uuid) -> NotifierResult<()> {
        Err(Error::internal("ledger offline"))
    }

    async fn mark_sent(&self, _task_id: Uuid) -> NotifierResult<()> {
        Err(Error::internal("ledger offline"))
    }

    async fn mark_failed(&self, _task_id: Uuid) -> NotifierResult<()> {
        Err(Error::internal("ledger offline"))
    }
}

/// Short timings so retry and shutdown paths finish in milliseconds.
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(2),
        handler_timeout: Duration::from_secs(1),
        lease_timeout: Duration::from_secs(5),
        maintenance_interval: Duration::from_millis(20),
        max_retries: 2,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2,
        },
    }
}

pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("condition not met within {:?}", timeout))
}

pub struct Fixture {
    pub database: DatabaseClient,
    pub pool: SqlitePool,
    pub store: SubscriptionStore,
    pub directory: Arc<SqliteDirectory>,
}

impl Fixture {
    pub async fn new() -> Result<Self> {
        let database = DatabaseClient::in_memory().await?;
        let pool = database.pool();

        Ok(Self {
            store: SubscriptionStore::new(pool.clone()),
            directory: Arc::new(SqliteDirectory::new(pool.clone())),
            database,
            pool,
        })
    }

    pub fn dispatcher(&self, email: Arc<RecordingEmailSender>) -> NotificationDispatcher {
        NotificationDispatcher::new(
            self.store.clone(),
            self.directory.clone(),
            self.directory.clone(),
            email,
            FRONTEND_URL,
        )
    }

    pub async fn user(&self, name: &str, email: Option<&str>) -> Result<i64> {
        let id = sqlx::query_scalar("INSERT INTO users (name, email) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn blog(&self, title: &str) -> Result<i64> {
        let id = sqlx::query_scalar("INSERT INTO blogs (title) VALUES (?) RETURNING id")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn sub_blog(&self, blog_id: i64, title: &str) -> Result<i64> {
        let id =
            sqlx::query_scalar("INSERT INTO sub_blogs (blog_id, title) VALUES (?, ?) RETURNING id")
                .bind(blog_id)
                .bind(title)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn comment(&self, sub_blog_id: i64, user_id: i64) -> Result<i64> {
        let id = sqlx::query_scalar(
            "INSERT INTO comments (sub_blog_id, user_id, content) VALUES (?, ?, 'nice post') RETURNING id",
        )
        .bind(sub_blog_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn delete_comment(&self, comment_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
