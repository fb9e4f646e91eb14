use anyhow::Result;
use blog_notifier::{
    error::Error,
    models::{
        caller::Caller,
        subscription::{NewSubscription, SubscriptionFilter},
        topic::Topic,
    },
};

use crate::common::Fixture;

fn reply_on(target_id: i64) -> NewSubscription {
    NewSubscription {
        topic: Topic::NewReplyOnPost,
        target_id,
    }
}

fn post_under(target_id: i64) -> NewSubscription {
    NewSubscription {
        topic: Topic::NewPostUnderBlog,
        target_id,
    }
}

/// Test: Match returns exactly the subscribers of one target
#[tokio::test]
async fn test_match_returns_only_target_subscribers() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let watched = fx.sub_blog(blog, "Lifetimes").await?;
    let neighbour = fx.sub_blog(blog, "Traits").await?;

    for name in ["ann", "ben", "cat"] {
        let user = fx.user(name, Some(&format!("{}@example.com", name))).await?;
        fx.store.create(&Caller::user(user), reply_on(watched)).await?;
    }

    let (matched, count) = fx.store.match_target(Topic::NewReplyOnPost, watched).await?;
    assert_eq!(count, 3);
    assert_eq!(matched.len(), 3);
    assert!(matched.iter().all(|s| s.target_id == watched && s.topic == Topic::NewReplyOnPost));

    let (matched, count) = fx.store.match_target(Topic::NewReplyOnPost, neighbour).await?;
    assert_eq!(count, 0);
    assert!(matched.is_empty());

    Ok(())
}

/// Test: Each topic reads its own table even when target ids collide
#[tokio::test]
async fn test_topics_are_routed_to_separate_tables() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let sub_blog = fx.sub_blog(blog, "Lifetimes").await?;
    assert_eq!(blog, sub_blog, "fresh tables should hand out the same first id");

    let user = fx.user("ann", Some("ann@example.com")).await?;
    fx.store.create(&Caller::user(user), post_under(blog)).await?;

    let (_, posts) = fx.store.match_target(Topic::NewPostUnderBlog, blog).await?;
    let (_, replies) = fx.store.match_target(Topic::NewReplyOnPost, sub_blog).await?;
    assert_eq!(posts, 1);
    assert_eq!(replies, 0);

    Ok(())
}

/// Test: The owner comes from the caller and duplicates conflict
#[tokio::test]
async fn test_create_uses_caller_and_rejects_duplicates() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let user = fx.user("ann", None).await?;
    let caller = Caller::user(user);

    let created = fx.store.create(&caller, post_under(blog)).await?;
    assert_eq!(created.user_id, user);
    assert_eq!(created.topic, Topic::NewPostUnderBlog);
    assert_eq!(created.target_id, blog);

    let duplicate = fx.store.create(&caller, post_under(blog)).await;
    assert!(matches!(duplicate, Err(Error::Conflict(_))));

    Ok(())
}

/// Test: Subscribing to a target that does not exist is NotFound
#[tokio::test]
async fn test_create_for_missing_target_is_not_found() -> Result<()> {
    let fx = Fixture::new().await?;
    let user = fx.user("ann", None).await?;

    let result = fx.store.create(&Caller::user(user), reply_on(404)).await;
    match result {
        Err(e @ Error::NotFound(_)) => assert_eq!(e.code(), "not_found"),
        other => panic!("expected NotFound, got {:?}", other),
    }

    Ok(())
}

/// Test: Ensure is insert-if-absent and returns the same row every time
#[tokio::test]
async fn test_ensure_is_idempotent() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let sub_blog = fx.sub_blog(blog, "Lifetimes").await?;
    let caller = Caller::user(fx.user("ann", None).await?);

    let first = fx.store.ensure(&caller, reply_on(sub_blog)).await?;
    let second = fx.store.ensure(&caller, reply_on(sub_blog)).await?;
    assert_eq!(first, second);

    let (_, count) = fx.store.match_target(Topic::NewReplyOnPost, sub_blog).await?;
    assert_eq!(count, 1);

    Ok(())
}

/// Test: The owner can delete a subscription, after which it is gone
#[tokio::test]
async fn test_owner_delete_then_find_is_not_found() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let caller = Caller::user(fx.user("ann", None).await?);

    let subscription = fx.store.create(&caller, post_under(blog)).await?;
    fx.store
        .delete(&caller, subscription.id, Topic::NewPostUnderBlog)
        .await?;

    let found = fx
        .store
        .find_by_id(subscription.id, Topic::NewPostUnderBlog)
        .await;
    assert!(matches!(found, Err(Error::NotFound(_))));

    let again = fx
        .store
        .delete(&caller, subscription.id, Topic::NewPostUnderBlog)
        .await;
    assert!(matches!(again, Err(Error::NotFound(_))));

    Ok(())
}

/// Test: A non-owner cannot delete and the row survives
#[tokio::test]
async fn test_non_owner_delete_is_unauthorized() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let owner = Caller::user(fx.user("ann", None).await?);
    let intruder = Caller::user(fx.user("ben", None).await?);

    let subscription = fx.store.create(&owner, post_under(blog)).await?;
    let result = fx
        .store
        .delete(&intruder, subscription.id, Topic::NewPostUnderBlog)
        .await;
    assert!(matches!(result, Err(Error::Unauthorized(_))));

    let still_there = fx
        .store
        .find_by_id(subscription.id, Topic::NewPostUnderBlog)
        .await?;
    assert_eq!(still_there, subscription);

    Ok(())
}

/// Test: Find filters across both tables and paginates with a full total
#[tokio::test]
async fn test_find_filters_and_paginates() -> Result<()> {
    let fx = Fixture::new().await?;
    let ann = Caller::user(fx.user("ann", None).await?);
    let ben = Caller::user(fx.user("ben", None).await?);

    let rust = fx.blog("Rust").await?;
    let go = fx.blog("Go").await?;
    let lifetimes = fx.sub_blog(rust, "Lifetimes").await?;

    fx.store.create(&ann, post_under(rust)).await?;
    fx.store.create(&ann, post_under(go)).await?;
    fx.store.create(&ann, reply_on(lifetimes)).await?;
    fx.store.create(&ben, post_under(rust)).await?;

    let everything_of_ann = SubscriptionFilter {
        user_id: Some(ann.user_id),
        ..Default::default()
    };
    let (found, total) = fx.store.find(&everything_of_ann).await?;
    assert_eq!(total, 3);
    assert_eq!(found.len(), 3);
    assert!(found.iter().any(|s| s.topic == Topic::NewReplyOnPost));

    let first_page = SubscriptionFilter {
        limit: 2,
        ..everything_of_ann.clone()
    };
    let (page, total) = fx.store.find(&first_page).await?;
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);

    let second_page = SubscriptionFilter {
        offset: 2,
        ..first_page.clone()
    };
    let (rest, _) = fx.store.find(&second_page).await?;
    assert_eq!(rest.len(), 1);
    assert!(page.iter().all(|s| !rest.contains(s)));

    let rust_posts = SubscriptionFilter {
        topic: Some(Topic::NewPostUnderBlog),
        target_id: Some(rust),
        ..Default::default()
    };
    let (found, total) = fx.store.find(&rust_posts).await?;
    assert_eq!(total, 2);
    assert!(found.iter().all(|s| s.target_id == rust));

    Ok(())
}

/// Test: Deleting a target removes its subscriptions
#[tokio::test]
async fn test_subscriptions_cascade_with_target() -> Result<()> {
    let fx = Fixture::new().await?;
    let blog = fx.blog("Rust").await?;
    let sub_blog = fx.sub_blog(blog, "Lifetimes").await?;
    let caller = Caller::user(fx.user("ann", None).await?);

    fx.store.create(&caller, reply_on(sub_blog)).await?;

    sqlx::query("DELETE FROM blogs WHERE id = ?")
        .bind(blog)
        .execute(&fx.pool)
        .await?;

    let (_, count) = fx.store.match_target(Topic::NewReplyOnPost, sub_blog).await?;
    assert_eq!(count, 0);

    Ok(())
}
