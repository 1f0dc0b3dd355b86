use super::post::RenderedMessage;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
}

/// Delivers finished messages to a target.
///
/// Failures are reported, not retried; a messenger that wants retries does
/// them itself.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, target: &str, message: &RenderedMessage) -> Result<(), DeliveryError>;
}

/// Writes messages to the log instead of sending them anywhere.
#[derive(Debug, Default)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn deliver(&self, target: &str, message: &RenderedMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            target_id = %target,
            feed = %message.feed_title,
            title = message.title.as_deref().unwrap_or_default(),
            link = message.link.as_deref().unwrap_or_default(),
            media = message.media.len(),
            "Message ready"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    #[serde(flatten)]
    message: &'a RenderedMessage,
}

/// POSTs each message as JSON to a fixed URL.
pub struct WebhookMessenger {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookMessenger {
    pub fn new(url: String, token: Option<SecretString>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn deliver(&self, target: &str, message: &RenderedMessage) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { target, message });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
