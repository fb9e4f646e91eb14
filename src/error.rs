use thiserror::Error;

/// Errors surfaced by the notification pipeline.
///
/// The variants mirror the stable error codes the CRUD layer maps onto HTTP
/// statuses; see [`Error::code`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("malformed payload for topic {topic}: {message}")]
    Decode { topic: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_topic(topic: impl Into<String>) -> Self {
        Self::InvalidTopic(topic.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn decode(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable, transport-agnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidTopic(_) | Error::Invalid(_) | Error::Decode { .. } => "invalid",
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Conflict(_) => "conflict",
            Error::Internal(_)
            | Error::Database(_)
            | Error::Redis(_)
            | Error::Amqp(_)
            | Error::Http(_)
            | Error::Serialization(_) => "internal",
        }
    }

    /// Whether a task that failed with this error may succeed if delivered again.
    ///
    /// Malformed payloads and unknown topics are producer bugs; redelivering
    /// them only burns the retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidTopic(_) | Error::Invalid(_) | Error::Decode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
