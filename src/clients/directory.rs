use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    clients::{CommentLookup, ContentLookup, UserLookup},
    error::Result,
    models::directory::{Blog, SubBlog, User},
};

/// Read-only view of the CRUD layer's tables.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserLookup for SqliteDirectory {
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as("SELECT id, name, email, is_admin FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl ContentLookup for SqliteDirectory {
    async fn find_blog_by_id(&self, id: i64) -> Result<Option<Blog>> {
        let blog =
            sqlx::query_as("SELECT id, title, description, created_at FROM blogs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blog)
    }

    async fn find_sub_blog_by_id(&self, id: i64) -> Result<Option<SubBlog>> {
        let sub_blog = sqlx::query_as(
            "SELECT id, blog_id, title, content, created_at FROM sub_blogs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub_blog)
    }
}

#[async_trait]
impl CommentLookup for SqliteDirectory {
    async fn count_comments(&self, user_id: i64, sub_blog_id: i64) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE user_id = ? AND sub_blog_id = ?")
                .bind(user_id)
                .bind(sub_blog_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}
