use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::{Error, Result},
    models::{
        directory::{Blog, SubBlog},
        topic::Topic,
    },
};

/// Payload of [`Topic::NewReplyOnPost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub sub_blog_id: i64,

    /// Snapshot attached by the consumer once it has looked the target up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_blog: Option<SubBlog>,

    /// The commenter; never notified about their own reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
}

/// Payload of [`Topic::NewPostUnderBlog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    pub blog_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog: Option<Blog>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
}

/// Topic-tagged payload. The variant *is* the topic, so a payload can never
/// be interpreted under the wrong one.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Reply(ReplyPayload),
    Post(PostPayload),
}

impl Payload {
    pub fn topic(&self) -> Topic {
        match self {
            Payload::Reply(_) => Topic::NewReplyOnPost,
            Payload::Post(_) => Topic::NewPostUnderBlog,
        }
    }

    pub fn target_id(&self) -> i64 {
        match self {
            Payload::Reply(p) => p.sub_blog_id,
            Payload::Post(p) => p.blog_id,
        }
    }

    pub fn author_id(&self) -> Option<i64> {
        match self {
            Payload::Reply(p) => p.author_id,
            Payload::Post(p) => p.author_id,
        }
    }

    /// Producer-side form: consumer snapshots are dropped before enqueueing.
    pub fn without_snapshot(&self) -> Self {
        match self {
            Payload::Reply(p) => Payload::Reply(ReplyPayload {
                sub_blog: None,
                ..p.clone()
            }),
            Payload::Post(p) => Payload::Post(PostPayload {
                blog: None,
                ..p.clone()
            }),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        let value = match self {
            Payload::Reply(p) => serde_json::to_value(p)?,
            Payload::Post(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decodes `value` as the payload shape registered for `topic`.
    pub fn decode(topic: Topic, value: JsonValue) -> Result<Self> {
        let decoded = match topic {
            Topic::NewReplyOnPost => serde_json::from_value(value).map(Payload::Reply),
            Topic::NewPostUnderBlog => serde_json::from_value(value).map(Payload::Post),
        };

        decoded.map_err(|e| Error::decode(topic.as_str(), e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    payload: Payload,
}

impl Event {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    pub fn new_reply(sub_blog_id: i64, author_id: Option<i64>) -> Self {
        Self::new(Payload::Reply(ReplyPayload {
            sub_blog_id,
            sub_blog: None,
            author_id,
        }))
    }

    pub fn new_post(blog_id: i64, author_id: Option<i64>) -> Self {
        Self::new(Payload::Post(PostPayload {
            blog_id,
            blog: None,
            author_id,
        }))
    }

    /// Parses a wire-level `(topic, payload)` pair. Unknown topics fail with
    /// [`Error::InvalidTopic`], malformed payloads with [`Error::Decode`].
    pub fn from_parts(topic: &str, payload: JsonValue) -> Result<Self> {
        let topic: Topic = topic.parse()?;
        Ok(Self::new(Payload::decode(topic, payload)?))
    }

    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// An event as handed to a topic handler, with its delivery metadata.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task_id: uuid::Uuid,
    pub attempt: u32,
    pub event: Event,
}
