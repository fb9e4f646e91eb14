//! Topic handlers: turn a delivered event into one email to the target's
//! subscribers.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{ContentLookup, DeliveryLedger, EmailSender, UserLookup},
    error::{Error, Result},
    models::{
        event::{Delivery, Payload, PostPayload, ReplyPayload},
        status::{DispatchOutcome, IdempotencyStatus},
        subscription::Subscription,
        topic::Topic,
        validation::validate_email_address,
    },
    queue::EventQueueBuilder,
    store::SubscriptionStore,
};

#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    no_subscribers: AtomicU64,
    skipped_recipients: AtomicU64,
    duplicates_suppressed: AtomicU64,
    emails_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    pub dispatched: u64,
    pub no_subscribers: u64,
    pub skipped_recipients: u64,
    pub duplicates_suppressed: u64,
    pub emails_sent: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            no_subscribers: self.no_subscribers.load(Ordering::Relaxed),
            skipped_recipients: self.skipped_recipients.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
        }
    }
}

pub struct NotificationDispatcher {
    store: SubscriptionStore,
    users: Arc<dyn UserLookup>,
    content: Arc<dyn ContentLookup>,
    email: Arc<dyn EmailSender>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
    frontend_url: String,
    stats: DispatchStats,
}

impl NotificationDispatcher {
    pub fn new(
        store: SubscriptionStore,
        users: Arc<dyn UserLookup>,
        content: Arc<dyn ContentLookup>,
        email: Arc<dyn EmailSender>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            users,
            content,
            email,
            ledger: None,
            frontend_url: frontend_url.into(),
            stats: DispatchStats::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Binds this dispatcher to every topic.
    pub fn register(self: &Arc<Self>, mut builder: EventQueueBuilder) -> EventQueueBuilder {
        for topic in Topic::ALL {
            let dispatcher = Arc::clone(self);
            builder = builder.register(topic, move |delivery| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.handle(delivery).await.map(|_| ()) }
            });
        }
        builder
    }

    pub async fn handle(&self, delivery: Delivery) -> Result<DispatchOutcome> {
        let task_id = delivery.task_id;
        let topic = delivery.event.topic();
        let payload = delivery.event.into_payload();
        let target_id = payload.target_id();

        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        if self.already_sent(task_id).await {
            info!(task_id = %task_id, topic = %topic, "Notification already sent, skipping");
            self.stats.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
            return Ok(DispatchOutcome::AlreadySent);
        }

        let (subscriptions, count) = self.store.match_target(topic, target_id).await?;
        if count == 0 {
            info!(task_id = %task_id, topic = %topic, target_id, "No subscribers for target");
            self.stats.no_subscribers.fetch_add(1, Ordering::Relaxed);
            return Ok(DispatchOutcome::NoSubscribers);
        }

        let recipients = self
            .resolve_recipients(&subscriptions, payload.author_id())
            .await?;
        if recipients.is_empty() {
            info!(
                task_id = %task_id,
                topic = %topic,
                target_id,
                subscribers = count,
                "No reachable recipients for target"
            );
            return Ok(DispatchOutcome::NoRecipients);
        }

        self.mark(task_id, IdempotencyStatus::Processing).await;

        let (subject, body) = match self.attach_snapshot(payload).await {
            Ok(payload) => self.render(&payload)?,
            Err(e) => {
                self.mark(task_id, IdempotencyStatus::Failed).await;
                return Err(e);
            }
        };

        if let Err(e) = self.email.send(&recipients, &body, &subject).await {
            self.mark(task_id, IdempotencyStatus::Failed).await;
            return Err(e);
        }

        self.mark(task_id, IdempotencyStatus::Sent).await;
        self.stats.emails_sent.fetch_add(1, Ordering::Relaxed);

        info!(
            task_id = %task_id,
            topic = %topic,
            target_id,
            recipients = recipients.len(),
            "Notification sent"
        );
        Ok(DispatchOutcome::Sent {
            recipients: recipients.len(),
        })
    }

    /// Addresses of every subscriber worth mailing, deduplicated, in
    /// subscription order.
    async fn resolve_recipients(
        &self,
        subscriptions: &[Subscription],
        author_id: Option<i64>,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            let user_id = subscription.user_id;

            if Some(user_id) == author_id {
                debug!(user_id, "Skipping the event's author");
                continue;
            }

            let Some(user) = self.users.find_user_by_id(user_id).await? else {
                warn!(user_id, subscription_id = subscription.id, "Subscriber not found");
                self.stats.skipped_recipients.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let Some(address) = user.email.filter(|a| !a.trim().is_empty()) else {
                warn!(user_id, "Subscriber has no email address");
                self.stats.skipped_recipients.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            if let Err(e) = validate_email_address(&address) {
                warn!(user_id, error = %e, "Subscriber has an invalid email address");
                self.stats.skipped_recipients.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if seen.insert(address.to_lowercase()) {
                recipients.push(address);
            }
        }

        Ok(recipients)
    }

    async fn attach_snapshot(&self, payload: Payload) -> Result<Payload> {
        match payload {
            Payload::Reply(reply) => {
                let sub_blog = self
                    .content
                    .find_sub_blog_by_id(reply.sub_blog_id)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("sub-blog {}", reply.sub_blog_id)))?;
                Ok(Payload::Reply(ReplyPayload {
                    sub_blog: Some(sub_blog),
                    ..reply
                }))
            }
            Payload::Post(post) => {
                let blog = self
                    .content
                    .find_blog_by_id(post.blog_id)
                    .await?
                    .ok_or_else(|| Error::not_found(format!("blog {}", post.blog_id)))?;
                Ok(Payload::Post(PostPayload {
                    blog: Some(blog),
                    ..post
                }))
            }
        }
    }

    fn render(&self, payload: &Payload) -> Result<(String, String)> {
        let title = match payload {
            Payload::Reply(ReplyPayload {
                sub_blog: Some(sub_blog),
                ..
            }) => sub_blog.title.clone(),
            Payload::Post(PostPayload {
                blog: Some(blog), ..
            }) => blog.title.clone(),
            _ => return Err(Error::internal("payload has no target snapshot to render")),
        };

        let topic = payload.topic();
        let route = topic.route();

        let mut variables = HashMap::new();
        variables.insert("title", title);
        variables.insert(
            "link",
            topic.deep_link(&self.frontend_url, payload.target_id()),
        );

        Ok((route.subject.render(&variables)?, route.body.render(&variables)?))
    }

    /// Ledger problems never fail a delivery; they only weaken duplicate
    /// suppression.
    async fn already_sent(&self, task_id: Uuid) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };

        match ledger.check(task_id).await {
            Ok(status) => status == IdempotencyStatus::Sent,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Delivery ledger unavailable");
                false
            }
        }
    }

    async fn mark(&self, task_id: Uuid, status: IdempotencyStatus) {
        let Some(ledger) = &self.ledger else {
            return;
        };

        let result = match status {
            IdempotencyStatus::Processing => ledger.mark_processing(task_id).await,
            IdempotencyStatus::Sent => ledger.mark_sent(task_id).await,
            IdempotencyStatus::Failed => ledger.mark_failed(task_id).await,
            IdempotencyStatus::NotFound => Ok(()),
        };

        if let Err(e) = result {
            warn!(
                task_id = %task_id,
                status = status.as_str(),
                error = %e,
                "Failed to update delivery ledger"
            );
        }
    }
}
