//! Notification channels alerts are delivered through
//!
//! A channel only knows how to send one message. Retries, throttling and queueing are
//! the dispatcher's business, so every implementation reports what went wrong through
//! [`DeliveryError`] and never retries on its own.

mod discord;
mod logging;
mod webhook;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::actors::messages::AlertKind;
use crate::config::{Alert, AlertsConfig};

pub use discord::{DiscordChannel, Embed, EmbedField, EmbedFooter, Message, MessageBuilder};
pub use logging::LogChannel;
pub use webhook::WebhookChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network failure, timeout or server error; worth retrying
    Transport(String),

    /// The endpoint asked us to slow down
    RateLimited,

    /// Credentials were rejected
    Auth(String),

    /// The channel is misconfigured (bad URL, unknown webhook)
    Config(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport(_))
    }

    /// Errors that will not go away without operator action
    pub fn is_persistent(&self) -> bool {
        matches!(self, DeliveryError::Auth(_) | DeliveryError::Config(_))
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transport(msg) => write!(f, "transport error: {}", msg),
            DeliveryError::RateLimited => write!(f, "rate limited by notification endpoint"),
            DeliveryError::Auth(msg) => write!(f, "authentication rejected: {}", msg),
            DeliveryError::Config(msg) => write!(f, "invalid channel configuration: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            DeliveryError::Config(err.to_string())
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}

/// Map an HTTP response status onto the delivery taxonomy
pub fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::TOO_MANY_REQUESTS => Err(DeliveryError::RateLimited),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(DeliveryError::Auth(status.to_string()))
        }
        s if s.is_client_error() => Err(DeliveryError::Config(status.to_string())),
        s => Err(DeliveryError::Transport(s.to_string())),
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, target: &str, message: &str, kind: AlertKind)
    -> Result<(), DeliveryError>;
}

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Build the configured channel, falling back to log-only delivery
pub fn from_config(config: &AlertsConfig) -> Arc<dyn NotificationChannel> {
    let timeout = Duration::from_secs(config.timeout.max(1));

    match &config.channel {
        Some(Alert::Discord(discord)) => Arc::new(DiscordChannel::new(discord.clone(), timeout)),
        Some(Alert::Webhook(webhook)) => Arc::new(WebhookChannel::new(webhook.clone(), timeout)),
        None => Arc::new(LogChannel),
    }
}
