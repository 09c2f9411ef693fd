use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use crate::actors::messages::AlertKind;
use crate::config::Webhook;

use super::{DeliveryError, NotificationChannel, classify_status, http_client};

/// Posts a flat JSON document to an arbitrary endpoint
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    config: Webhook,
}

impl WebhookChannel {
    pub fn new(config: Webhook, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            config,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip(self, message), fields(channel = "webhook"))]
    async fn send(
        &self,
        target: &str,
        message: &str,
        kind: AlertKind,
    ) -> Result<(), DeliveryError> {
        let payload = json!({
            "message": message,
            "target": target,
            "category": kind,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.config.url).json(&payload).send().await?;
        classify_status(response.status())?;

        debug!("sent webhook alert");
        Ok(())
    }
}
