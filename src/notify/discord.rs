use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::actors::messages::AlertKind;
use crate::config::Discord;

use super::{DeliveryError, NotificationChannel, classify_status, http_client};

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;
const ORANGE: u32 = 15105570;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Posts alerts as embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordChannel {
    client: Client,
    config: Discord,
}

impl DiscordChannel {
    pub fn new(config: Discord, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            config,
        }
    }

    pub fn build_embed(&self, target: &str, message: &str, kind: AlertKind) -> Embed {
        let (title, color) = match kind {
            AlertKind::Down => ("🔴 Target Down", RED),
            AlertKind::Loss => ("⚠️ Packet Loss", ORANGE),
            AlertKind::Recovery => ("✅ Target Recovered", GREEN),
        };

        Embed {
            title: Some(title.to_string()),
            description: Some(message.to_string()),
            color: Some(color),
            fields: vec![
                EmbedField {
                    name: "🎯 Target".to_string(),
                    value: target.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "🏷️ Category".to_string(),
                    value: kind.to_string(),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: "pingguard".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn build_message(&self, target: &str, message: &str, kind: AlertKind) -> Message {
        let mut builder = MessageBuilder::new().add_embed(self.build_embed(target, message, kind));
        if let Some(user_id) = &self.config.user_id
            && kind != AlertKind::Recovery
        {
            builder = builder.content(format!("📡 ({target} ~ {kind}) <@{user_id}>"));
        }
        builder.build()
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    #[instrument(skip(self, message), fields(channel = "discord"))]
    async fn send(
        &self,
        target: &str,
        message: &str,
        kind: AlertKind,
    ) -> Result<(), DeliveryError> {
        let payload = self.build_message(target, message, kind);
        let response = self.client.post(&self.config.url).json(&payload).send().await?;
        let status = response.status();

        if let Err(e) = classify_status(status) {
            if let Ok(error_text) = response.text().await {
                warn!("Discord API error response: {}", error_text);
            }
            return Err(e);
        }

        debug!("sent Discord message");
        Ok(())
    }
}
