//! Subscription persistence.
//!
//! Each topic family lives in its own table (see [`TopicRoute`]); the topic
//! picks the table and target column, and every query aliases that column to
//! `target_id` so both tables decode into the same row type.

use sqlx::{SqlitePool, Sqlite, Transaction};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    models::{
        caller::Caller,
        subscription::{NewSubscription, Subscription, SubscriptionFilter, SubscriptionRow},
        topic::{Topic, TopicRoute},
    },
};

#[derive(Debug, sqlx::FromRow)]
struct FoundRow {
    id: i64,
    user_id: i64,
    target_id: i64,
    topic: String,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every subscription to `target_id` under `topic`, with its count.
    pub async fn match_target(
        &self,
        topic: Topic,
        target_id: i64,
    ) -> Result<(Vec<Subscription>, usize)> {
        let route = topic.route();
        let sql = format!(
            "SELECT id, user_id, {col} AS target_id FROM {table} WHERE {col} = ? ORDER BY id",
            col = route.target_column,
            table = route.table,
        );

        let mut tx = self.pool.begin().await?;
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(target_id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let subscriptions: Vec<Subscription> = rows
            .into_iter()
            .map(|row| row.into_subscription(topic))
            .collect();
        let count = subscriptions.len();

        debug!(topic = %topic, target_id, count, "Matched subscriptions");
        Ok((subscriptions, count))
    }

    /// Subscribes the caller. The owner always comes from `caller`.
    pub async fn create(&self, caller: &Caller, new: NewSubscription) -> Result<Subscription> {
        let route = new.topic.route();
        let sql = format!(
            "INSERT INTO {table} (user_id, {col}) VALUES (?, ?) \
             RETURNING id, user_id, {col} AS target_id",
            col = route.target_column,
            table = route.table,
        );

        let mut tx = self.pool.begin().await?;
        let row: SubscriptionRow = sqlx::query_as(&sql)
            .bind(caller.user_id)
            .bind(new.target_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| insert_error(e, route, caller, new.target_id))?;
        tx.commit().await?;

        info!(
            subscription_id = row.id,
            user_id = caller.user_id,
            topic = %new.topic,
            target_id = new.target_id,
            "Subscription created"
        );
        Ok(row.into_subscription(new.topic))
    }

    /// Like [`create`](Self::create), but an existing subscription is returned
    /// as-is instead of being a conflict.
    pub async fn ensure(&self, caller: &Caller, new: NewSubscription) -> Result<Subscription> {
        let route = new.topic.route();
        let insert = format!(
            "INSERT OR IGNORE INTO {table} (user_id, {col}) VALUES (?, ?)",
            col = route.target_column,
            table = route.table,
        );
        let select = format!(
            "SELECT id, user_id, {col} AS target_id FROM {table} WHERE user_id = ? AND {col} = ?",
            col = route.target_column,
            table = route.table,
        );

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(&insert)
            .bind(caller.user_id)
            .bind(new.target_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(e, route, caller, new.target_id))?
            .rows_affected();
        let row: SubscriptionRow = sqlx::query_as(&select)
            .bind(caller.user_id)
            .bind(new.target_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        if inserted > 0 {
            info!(
                subscription_id = row.id,
                user_id = caller.user_id,
                topic = %new.topic,
                target_id = new.target_id,
                "Subscription created"
            );
        }
        Ok(row.into_subscription(new.topic))
    }

    pub async fn delete(&self, caller: &Caller, id: i64, topic: Topic) -> Result<()> {
        let route = topic.route();

        let mut tx = self.pool.begin().await?;
        let existing = fetch_by_id(&mut tx, route, id)
            .await?
            .ok_or_else(|| not_found(topic, id))?;

        if existing.user_id != caller.user_id {
            return Err(Error::unauthorized(format!(
                "subscription {} belongs to another user",
                id
            )));
        }

        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", route.table))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            subscription_id = id,
            user_id = caller.user_id,
            topic = %topic,
            "Subscription deleted"
        );
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64, topic: Topic) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;
        let row = fetch_by_id(&mut tx, topic.route(), id).await?;
        tx.commit().await?;

        row.map(|row| row.into_subscription(topic))
            .ok_or_else(|| not_found(topic, id))
    }

    /// Filtered page of subscriptions plus the total matching the filter. A
    /// filter without a topic searches both tables. `limit <= 0` means no limit.
    pub async fn find(&self, filter: &SubscriptionFilter) -> Result<(Vec<Subscription>, u64)> {
        let topics: Vec<Topic> = match filter.topic {
            Some(topic) => vec![topic],
            None => Topic::ALL.to_vec(),
        };

        let sources = topics
            .iter()
            .map(|topic| {
                let route = topic.route();
                format!(
                    "SELECT id, user_id, {col} AS target_id, '{name}' AS topic FROM {table}",
                    col = route.target_column,
                    name = route.name,
                    table = route.table,
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");

        let predicate = "(?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR target_id = ?2)";
        let count_sql = format!("SELECT COUNT(*) FROM ({}) WHERE {}", sources, predicate);
        let page_sql = format!(
            "SELECT id, user_id, target_id, topic FROM ({}) WHERE {} \
             ORDER BY topic, id LIMIT ?3 OFFSET ?4",
            sources, predicate
        );

        let limit = if filter.limit > 0 { filter.limit } else { -1 };
        let offset = filter.offset.max(0);

        let mut tx = self.pool.begin().await?;
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(filter.user_id)
            .bind(filter.target_id)
            .fetch_one(&mut *tx)
            .await?;
        let rows: Vec<FoundRow> = sqlx::query_as(&page_sql)
            .bind(filter.user_id)
            .bind(filter.target_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let subscriptions = rows
            .into_iter()
            .map(|row| {
                Ok(Subscription {
                    id: row.id,
                    user_id: row.user_id,
                    topic: row.topic.parse()?,
                    target_id: row.target_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((subscriptions, total.max(0) as u64))
    }
}

async fn fetch_by_id(
    tx: &mut Transaction<'_, Sqlite>,
    route: &TopicRoute,
    id: i64,
) -> Result<Option<SubscriptionRow>> {
    let sql = format!(
        "SELECT id, user_id, {col} AS target_id FROM {table} WHERE id = ?",
        col = route.target_column,
        table = route.table,
    );
    let row = sqlx::query_as(&sql).bind(id).fetch_optional(&mut **tx).await?;
    Ok(row)
}

fn not_found(topic: Topic, id: i64) -> Error {
    Error::not_found(format!("subscription {} under {}", id, topic))
}

fn insert_error(err: sqlx::Error, route: &TopicRoute, caller: &Caller, target_id: i64) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return Error::conflict(format!(
                "user {} is already subscribed to {} {}",
                caller.user_id, route.link_segment, target_id
            ));
        }
        if db.is_foreign_key_violation() {
            return Error::not_found(format!("{} {}", route.link_segment, target_id));
        }
    }
    err.into()
}
