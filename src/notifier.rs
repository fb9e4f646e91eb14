use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clients::CommentLookup,
    error::{Error, Result},
    models::{
        caller::Caller,
        event::Event,
        subscription::{NewSubscription, Subscription, SubscriptionFilter},
        topic::Topic,
    },
    queue::EventProducer,
    store::SubscriptionStore,
};

/// Hooks the CRUD layer calls after it has committed a content change.
#[derive(Clone)]
pub struct Notifier {
    producer: EventProducer,
    store: SubscriptionStore,
    comments: Arc<dyn CommentLookup>,
}

impl Notifier {
    pub fn new(
        producer: EventProducer,
        store: SubscriptionStore,
        comments: Arc<dyn CommentLookup>,
    ) -> Self {
        Self {
            producer,
            store,
            comments,
        }
    }

    /// A sub-blog was published under `blog_id`.
    pub async fn sub_blog_created(&self, caller: &Caller, blog_id: i64) -> Result<Uuid> {
        let task_id = self
            .producer
            .push(&Event::new_post(blog_id, Some(caller.user_id)))
            .await?;

        info!(task_id = %task_id, blog_id, author_id = caller.user_id, "New post event queued");
        Ok(task_id)
    }

    /// A comment was added to `sub_blog_id`: notify its subscribers and make
    /// sure the commenter hears about later replies.
    pub async fn comment_created(
        &self,
        caller: &Caller,
        sub_blog_id: i64,
    ) -> Result<(Uuid, Subscription)> {
        let task_id = self
            .producer
            .push(&Event::new_reply(sub_blog_id, Some(caller.user_id)))
            .await?;

        let subscription = self
            .store
            .ensure(
                caller,
                NewSubscription {
                    topic: Topic::NewReplyOnPost,
                    target_id: sub_blog_id,
                },
            )
            .await?;

        info!(
            task_id = %task_id,
            sub_blog_id,
            user_id = caller.user_id,
            subscription_id = subscription.id,
            "Reply event queued"
        );
        Ok((task_id, subscription))
    }

    /// A comment was removed from `sub_blog_id`. Once the caller has no
    /// comments left there, their reply subscription goes too. Returns whether
    /// a subscription was removed.
    pub async fn comment_deleted(&self, caller: &Caller, sub_blog_id: i64) -> Result<bool> {
        let remaining = self
            .comments
            .count_comments(caller.user_id, sub_blog_id)
            .await?;
        if remaining > 0 {
            debug!(
                user_id = caller.user_id,
                sub_blog_id, remaining, "Commenter still active, keeping subscription"
            );
            return Ok(false);
        }

        let filter = SubscriptionFilter {
            user_id: Some(caller.user_id),
            topic: Some(Topic::NewReplyOnPost),
            target_id: Some(sub_blog_id),
            ..Default::default()
        };
        let (subscriptions, _) = self.store.find(&filter).await?;

        let mut removed = false;
        for subscription in subscriptions {
            match self
                .store
                .delete(caller, subscription.id, subscription.topic)
                .await
            {
                Ok(()) => removed = true,
                // Already gone: a concurrent unsubscribe won.
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if removed {
            info!(
                user_id = caller.user_id,
                sub_blog_id, "Reply subscription removed after last comment was deleted"
            );
        }
        Ok(removed)
    }
}
