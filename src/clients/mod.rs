//! Adapters for everything outside the process, and the narrow traits the
//! dispatcher and notifier see them through.

pub mod circuit_breaker;
pub mod database;
pub mod directory;
pub mod email;
pub mod health;
pub mod idempotency;
pub mod rbmq;
pub mod redis;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        directory::{Blog, SubBlog, User},
        status::IdempotencyStatus,
    },
};

#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>>;
}

#[async_trait]
pub trait ContentLookup: Send + Sync {
    async fn find_blog_by_id(&self, id: i64) -> Result<Option<Blog>>;
    async fn find_sub_blog_by_id(&self, id: i64) -> Result<Option<SubBlog>>;
}

#[async_trait]
pub trait CommentLookup: Send + Sync {
    /// Comments `user_id` still has on `sub_blog_id`.
    async fn count_comments(&self, user_id: i64, sub_blog_id: i64) -> Result<u64>;
}

/// Outbound mail. One call sends one message to every address in `to`.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &[String], body: &str, subject: &str) -> Result<()>;
}

/// Per-task record of what has already been delivered.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn check(&self, task_id: Uuid) -> Result<IdempotencyStatus>;
    async fn mark_processing(&self, task_id: Uuid) -> Result<()>;
    async fn mark_sent(&self, task_id: Uuid) -> Result<()>;
    async fn mark_failed(&self, task_id: Uuid) -> Result<()>;
}
