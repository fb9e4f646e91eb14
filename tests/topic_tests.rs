use std::collections::HashMap;

use anyhow::Result;
use blog_notifier::{
    error::Error,
    models::{
        event::{Event, Payload},
        template::MessageTemplate,
        topic::Topic,
    },
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

/// Test: Topic names parse back to the same topic
#[tokio::test]
async fn test_topic_names_round_trip() -> Result<()> {
    for topic in Topic::ALL {
        let parsed: Topic = topic.as_str().parse()?;
        assert_eq!(parsed, topic);
    }

    assert_eq!("new-reply-on-post".parse::<Topic>()?, Topic::NewReplyOnPost);
    assert_eq!(serde_json::to_value(Topic::NewPostUnderBlog)?, json!("new-post-under-blog"));

    Ok(())
}

/// Test: Anything outside the closed topic set is an invalid topic
#[tokio::test]
async fn test_unknown_topic_is_rejected() -> Result<()> {
    for name in ["new-like-on-post", "", "NEW-REPLY-ON-POST"] {
        match name.parse::<Topic>() {
            Err(e @ Error::InvalidTopic(_)) => {
                assert_eq!(e.code(), "invalid");
                assert!(!e.is_retryable());
            }
            other => panic!("{:?} parsed as {:?}", name, other),
        }
    }

    assert_err!(serde_json::from_value::<Topic>(json!("new-like-on-post")));

    Ok(())
}

/// Test: Deep links point at the right page regardless of a trailing slash
#[tokio::test]
async fn test_deep_links() -> Result<()> {
    assert_eq!(
        Topic::NewPostUnderBlog.deep_link("https://blog.example.com", 7),
        "https://blog.example.com/blog/7"
    );
    assert_eq!(
        Topic::NewReplyOnPost.deep_link("https://blog.example.com/", 9),
        "https://blog.example.com/sub-blog/9"
    );

    Ok(())
}

/// Test: Placeholders are replaced once, values are copied verbatim
#[tokio::test]
async fn test_template_renders_variables() -> Result<()> {
    let variables = HashMap::from([
        ("title", "{{link}} tricks".to_string()),
        ("link", "https://blog.example.com/blog/1".to_string()),
    ]);

    let subject = Topic::NewPostUnderBlog.route().subject.render(&variables)?;
    assert_eq!(subject, "New Article On {{link}} tricks");

    let spaced = assert_ok!(MessageTemplate::new("Hi {{ title }}!").render(&variables));
    assert_eq!(spaced, "Hi {{link}} tricks!");

    Ok(())
}

/// Test: A placeholder without a value fails instead of leaking into the message
#[tokio::test]
async fn test_template_missing_variable_is_invalid() -> Result<()> {
    let variables = HashMap::from([("title", "Rust".to_string())]);

    let result = Topic::NewReplyOnPost.route().body.render(&variables);
    assert!(matches!(result, Err(Error::Invalid(_))));

    Ok(())
}

/// Test: Payloads decode under their topic and reject the wrong shape
#[tokio::test]
async fn test_event_from_parts() -> Result<()> {
    let event = Event::from_parts("new-reply-on-post", json!({ "sub_blog_id": 4, "author_id": 2 }))?;
    assert_eq!(event.topic(), Topic::NewReplyOnPost);
    match event.payload() {
        Payload::Reply(p) => {
            assert_eq!(p.sub_blog_id, 4);
            assert_eq!(p.author_id, Some(2));
            assert!(p.sub_blog.is_none());
        }
        other => panic!("unexpected payload {:?}", other),
    }

    let wrong_shape = Event::from_parts("new-post-under-blog", json!({ "sub_blog_id": 4 }));
    assert!(matches!(wrong_shape, Err(Error::Decode { .. })));

    let unknown = Event::from_parts("new-like-on-post", json!({}));
    assert!(matches!(unknown, Err(Error::InvalidTopic(_))));

    Ok(())
}
