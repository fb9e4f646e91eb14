use std::sync::Arc;

use anyhow::Result;
use blog_notifier::{
    error::Error,
    models::{
        caller::Caller,
        event::{Delivery, Event},
        status::{DispatchOutcome, IdempotencyStatus},
        subscription::NewSubscription,
        topic::Topic,
    },
};
use uuid::Uuid;

use crate::common::{BrokenLedger, Fixture, InMemoryLedger, RecordingEmailSender};

fn delivery(event: Event) -> Delivery {
    Delivery {
        task_id: Uuid::new_v4(),
        attempt: 1,
        event,
    }
}

async fn subscribe(fx: &Fixture, user_id: i64, topic: Topic, target_id: i64) -> Result<()> {
    fx.store
        .create(&Caller::user(user_id), NewSubscription { topic, target_id })
        .await?;
    Ok(())
}

/// Test: A new post mails every subscriber of the blog except its author
#[tokio::test]
async fn test_new_post_notifies_subscribers_but_not_author() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Systems Programming").await?;
    let author = fx.user("ann", Some("ann@example.com")).await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, author, Topic::NewPostUnderBlog, blog).await?;
    subscribe(&fx, reader, Topic::NewPostUnderBlog, blog).await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    let outcome = dispatcher
        .handle(delivery(Event::new_post(blog, Some(author))))
        .await?;
    assert_eq!(outcome, DispatchOutcome::Sent { recipients: 1 });

    let sent = email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ben@example.com".to_string()]);
    assert_eq!(sent[0].subject, "New Article On Systems Programming");
    assert_eq!(
        sent[0].body,
        format!(
            "There's been a new article on Systems Programming, go check it out! https://blog.example.com/blog/{}",
            blog
        )
    );

    Ok(())
}

/// Test: A reply links to the sub-blog page
#[tokio::test]
async fn test_reply_links_to_sub_blog() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let sub_blog = fx.sub_blog(blog, "Pinning {{explained}}").await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, reader, Topic::NewReplyOnPost, sub_blog).await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    dispatcher
        .handle(delivery(Event::new_reply(sub_blog, None)))
        .await?;

    let sent = email.sent();
    assert_eq!(sent[0].subject, "New Comment On Pinning {{explained}}");
    assert!(sent[0]
        .body
        .ends_with(&format!("https://blog.example.com/sub-blog/{}", sub_blog)));

    Ok(())
}

/// Test: Zero subscribers is a successful no-op
#[tokio::test]
async fn test_no_subscribers_sends_nothing() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Quiet").await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    let outcome = dispatcher
        .handle(delivery(Event::new_post(blog, None)))
        .await?;
    assert_eq!(outcome, DispatchOutcome::NoSubscribers);
    assert!(email.sent().is_empty());
    assert_eq!(dispatcher.stats().no_subscribers, 1);

    Ok(())
}

/// Test: Subscribers without a usable address are skipped and addresses are deduplicated
#[tokio::test]
async fn test_unreachable_subscribers_are_skipped() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;

    let no_email = fx.user("ann", None).await?;
    let bad_email = fx.user("ben", Some("not-an-address")).await?;
    let first = fx.user("cat", Some("shared@example.com")).await?;
    let second = fx.user("dan", Some("Shared@Example.com")).await?;
    for user in [no_email, bad_email, first, second] {
        subscribe(&fx, user, Topic::NewPostUnderBlog, blog).await?;
    }

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    let outcome = dispatcher
        .handle(delivery(Event::new_post(blog, None)))
        .await?;
    assert_eq!(outcome, DispatchOutcome::Sent { recipients: 1 });
    assert_eq!(email.sent()[0].to, vec!["shared@example.com".to_string()]);
    assert_eq!(dispatcher.stats().skipped_recipients, 2);

    Ok(())
}

/// Test: Only the author being subscribed yields no email
#[tokio::test]
async fn test_only_author_subscribed_is_no_recipients() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let sub_blog = fx.sub_blog(blog, "Lifetimes").await?;
    let author = fx.user("ann", Some("ann@example.com")).await?;
    subscribe(&fx, author, Topic::NewReplyOnPost, sub_blog).await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    let outcome = dispatcher
        .handle(delivery(Event::new_reply(sub_blog, Some(author))))
        .await?;
    assert_eq!(outcome, DispatchOutcome::NoRecipients);
    assert!(email.sent().is_empty());

    Ok(())
}

/// Test: Email failures surface as retryable errors
#[tokio::test]
async fn test_email_failure_is_retryable() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, reader, Topic::NewPostUnderBlog, blog).await?;

    let email = Arc::new(RecordingEmailSender::failing(1));
    let ledger = Arc::new(InMemoryLedger::default());
    let dispatcher = fx.dispatcher(email.clone()).with_ledger(ledger.clone());

    let failed = delivery(Event::new_post(blog, None));
    let task_id = failed.task_id;
    let err = dispatcher
        .handle(failed.clone())
        .await
        .expect_err("first send should fail");
    assert!(err.is_retryable());
    assert_eq!(ledger.status(task_id), IdempotencyStatus::Failed);

    let outcome = dispatcher.handle(failed).await?;
    assert_eq!(outcome, DispatchOutcome::Sent { recipients: 1 });
    assert_eq!(ledger.status(task_id), IdempotencyStatus::Sent);

    Ok(())
}

/// Test: A redelivered task already marked sent is not mailed twice
#[tokio::test]
async fn test_ledger_suppresses_duplicate_delivery() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, reader, Topic::NewPostUnderBlog, blog).await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx
        .dispatcher(email.clone())
        .with_ledger(Arc::new(InMemoryLedger::default()));

    let first = delivery(Event::new_post(blog, None));
    let redelivered = Delivery {
        attempt: 2,
        ..first.clone()
    };

    dispatcher.handle(first).await?;
    let outcome = dispatcher.handle(redelivered).await?;

    assert_eq!(outcome, DispatchOutcome::AlreadySent);
    assert_eq!(email.sent().len(), 1);

    Ok(())
}

/// Test: A ledger outage degrades to plain delivery instead of failing
#[tokio::test]
async fn test_ledger_outage_is_not_fatal() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, reader, Topic::NewPostUnderBlog, blog).await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx
        .dispatcher(email.clone())
        .with_ledger(Arc::new(BrokenLedger));

    let outcome = dispatcher
        .handle(delivery(Event::new_post(blog, None)))
        .await?;
    assert_eq!(outcome, DispatchOutcome::Sent { recipients: 1 });

    Ok(())
}

/// Test: A target that vanished after subscribers matched is a retryable lookup failure
#[tokio::test]
async fn test_missing_target_fails_the_delivery() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let reader = fx.user("ben", Some("ben@example.com")).await?;
    subscribe(&fx, reader, Topic::NewPostUnderBlog, blog).await?;

    sqlx::query("PRAGMA foreign_keys = OFF").execute(&fx.pool).await?;
    sqlx::query("DELETE FROM blogs WHERE id = ?")
        .bind(blog)
        .execute(&fx.pool)
        .await?;

    let email = Arc::new(RecordingEmailSender::default());
    let dispatcher = fx.dispatcher(email.clone());

    let result = dispatcher
        .handle(delivery(Event::new_post(blog, None)))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(email.sent().is_empty());

    Ok(())
}
