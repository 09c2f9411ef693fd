//! Notification channels against a mock HTTP endpoint

use std::time::Duration;

use pingguard::actors::messages::AlertKind;
use pingguard::config::{Discord, Webhook};
use pingguard::notify::{DeliveryError, DiscordChannel, NotificationChannel, WebhookChannel};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn webhook(server: &MockServer) -> WebhookChannel {
    WebhookChannel::new(
        Webhook {
            url: format!("{}/hook", server.uri()),
        },
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_webhook_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({
            "target": "gateway",
            "category": "down",
            "message": "gateway is DOWN"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let result = webhook(&server)
        .send("gateway", "gateway is DOWN", AlertKind::Down)
        .await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn test_webhook_error_taxonomy() {
    for (status, expected) in [
        (429, DeliveryError::RateLimited),
        (401, DeliveryError::Auth("401 Unauthorized".into())),
        (404, DeliveryError::Config("404 Not Found".into())),
        (503, DeliveryError::Transport("503 Service Unavailable".into())),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let result = webhook(&server)
            .send("gateway", "gateway lost 50% of probes", AlertKind::Loss)
            .await;
        assert_eq!(result, Err(expected));
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let channel = WebhookChannel::new(
        Webhook {
            url: "http://127.0.0.1:1/hook".to_string(),
        },
        Duration::from_secs(2),
    );

    let result = channel.send("gateway", "down", AlertKind::Down).await;
    assert!(matches!(result, Err(DeliveryError::Transport(_))));
}

#[tokio::test]
async fn test_discord_embed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/discord"))
        .and(body_partial_json(json!({
            "content": "📡 (gateway ~ down) <@1234>",
            "embeds": [{ "description": "gateway is DOWN", "color": 15158332 }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let channel = DiscordChannel::new(
        Discord {
            url: format!("{}/discord", server.uri()),
            user_id: Some("1234".to_string()),
        },
        Duration::from_secs(2),
    );

    let result = channel
        .send("gateway", "gateway is DOWN", AlertKind::Down)
        .await;
    assert_eq!(result, Ok(()));
}
