use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::{EmailSender, circuit_breaker::CircuitBreaker},
    error::{Error, Result},
    models::{
        email::{EmailRequest, EmailResponse},
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_token: String,
    pub from: String,
}

/// Transactional mail API client: bearer-authenticated JSON `POST`, retried
/// with backoff inside an optional shared circuit breaker.
pub struct HttpEmailClient {
    http_client: Client,
    settings: EmailSettings,
    retry_config: RetryConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

impl HttpEmailClient {
    pub fn new(
        settings: EmailSettings,
        retry_config: RetryConfig,
        circuit_breaker: Option<CircuitBreaker>,
    ) -> Self {
        info!(api_url = %settings.api_url, from = %settings.from, "Email client initialized");

        Self {
            http_client: Client::new(),
            settings,
            retry_config,
            circuit_breaker,
        }
    }

    async fn send_with_retry(&self, request: &EmailRequest) -> Result<()> {
        retry_with_backoff(&self.retry_config, || self.send_once(request)).await
    }

    async fn send_once(&self, request: &EmailRequest) -> Result<()> {
        let response = self
            .http_client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: Option<EmailResponse> = response.json().await.ok();
            debug!(
                message_id = body.as_ref().and_then(|b| b.id.as_deref()).unwrap_or("-"),
                recipients = request.to.len(),
                "Email accepted by provider"
            );
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<EmailResponse>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or(text);

        Err(Error::internal(format!(
            "email request failed with {}: {}",
            status, detail
        )))
    }
}

#[async_trait]
impl EmailSender for HttpEmailClient {
    async fn send(&self, to: &[String], body: &str, subject: &str) -> Result<()> {
        if to.is_empty() {
            return Err(Error::invalid("email needs at least one recipient"));
        }

        let request = EmailRequest {
            from: self.settings.from.clone(),
            to: to.to_vec(),
            subject: subject.to_string(),
            text: body.to_string(),
        };

        match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| self.send_with_retry(&request)).await?,
            None => self.send_with_retry(&request).await?,
        }

        info!(recipients = to.len(), subject, "Email sent");
        Ok(())
    }
}

/// Stand-in used when no mail API is configured: messages only reach the log.
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &[String], body: &str, subject: &str) -> Result<()> {
        info!(to = ?to, subject, body, "Email not sent, no mail API configured");
        Ok(())
    }
}
