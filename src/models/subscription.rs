use serde::{Deserialize, Serialize};

use crate::models::topic::Topic;

/// A user's interest in one target object under one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub topic: Topic,
    pub target_id: i64,
}

/// Request to subscribe the calling user; the owner is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub topic: Topic,
    pub target_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub user_id: Option<i64>,
    pub topic: Option<Topic>,
    pub target_id: Option<i64>,

    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: i64,
}

/// Row shape shared by both subscription tables; the target column is
/// aliased to `target_id` in every query.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
}

impl SubscriptionRow {
    pub fn into_subscription(self, topic: Topic) -> Subscription {
        Subscription {
            id: self.id,
            user_id: self.user_id,
            topic,
            target_id: self.target_id,
        }
    }
}
