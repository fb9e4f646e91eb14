use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{error::Error, models::template::MessageTemplate};

/// The closed set of event topics the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// A comment was added to a sub-blog.
    NewReplyOnPost,
    /// A sub-blog was added to a blog.
    NewPostUnderBlog,
}

/// Everything the pipeline needs to know about one topic: where its
/// subscriptions live, how to link to its target and what to tell subscribers.
#[derive(Debug, Clone, Copy)]
pub struct TopicRoute {
    pub topic: Topic,
    pub name: &'static str,
    pub table: &'static str,
    pub target_column: &'static str,
    pub link_segment: &'static str,
    pub subject: MessageTemplate,
    pub body: MessageTemplate,
}

const REGISTRY: [TopicRoute; 2] = [
    TopicRoute {
        topic: Topic::NewReplyOnPost,
        name: "new-reply-on-post",
        table: "sub_blog_subscriptions",
        target_column: "sub_blog_id",
        link_segment: "sub-blog",
        subject: MessageTemplate::new("New Comment On {{title}}"),
        body: MessageTemplate::new(
            "There's been a new comment on {{title}}, go check it out! {{link}}",
        ),
    },
    TopicRoute {
        topic: Topic::NewPostUnderBlog,
        name: "new-post-under-blog",
        table: "blog_subscriptions",
        target_column: "blog_id",
        link_segment: "blog",
        subject: MessageTemplate::new("New Article On {{title}}"),
        body: MessageTemplate::new(
            "There's been a new article on {{title}}, go check it out! {{link}}",
        ),
    },
];

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::NewReplyOnPost, Topic::NewPostUnderBlog];

    pub fn route(self) -> &'static TopicRoute {
        match self {
            Topic::NewReplyOnPost => &REGISTRY[0],
            Topic::NewPostUnderBlog => &REGISTRY[1],
        }
    }

    pub fn as_str(self) -> &'static str {
        self.route().name
    }

    /// Front-end deep link to the object a notification for this topic is about.
    pub fn deep_link(self, frontend_url: &str, target_id: i64) -> String {
        format!(
            "{}/{}/{}",
            frontend_url.trim_end_matches('/'),
            self.route().link_segment,
            target_id
        )
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .iter()
            .find(|route| route.name == s)
            .map(|route| route.topic)
            .ok_or_else(|| Error::invalid_topic(s))
    }
}

impl TryFrom<String> for Topic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
