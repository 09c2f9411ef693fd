//! Delivery, queueing, flushing and expiry through the dispatcher

use chrono::Utc;
use pingguard::actors::dispatcher::DispatcherHandle;
use pingguard::actors::messages::{AlertEvent, AlertKind};
use pingguard::notify::DeliveryError;
use pingguard::queue::AlertQueue;
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn spawn(
    dir: &std::path::Path,
    channel: &std::sync::Arc<RecordingChannel>,
    throttle_secs: i64,
) -> DispatcherHandle {
    DispatcherHandle::spawn(
        channel.clone(),
        AlertQueue::open(dir).unwrap(),
        dispatch_settings(throttle_secs),
    )
}

#[tokio::test]
async fn test_failed_delivery_is_queued_once_then_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let channel = RecordingChannel::new();
    channel.fail_with(DeliveryError::Transport("connection refused".into()));
    let dispatcher = spawn(dir.path(), &channel, 0);

    dispatcher
        .notify(AlertEvent::new(AlertKind::Down, "gw", "gw is DOWN"))
        .await
        .unwrap();
    assert_eq!(dispatcher.flush().await.unwrap(), 0);

    let queue = AlertQueue::open(dir.path()).unwrap();
    assert_eq!(queue.len().unwrap(), 1);

    channel.recover();
    assert_eq!(dispatcher.flush().await.unwrap(), 1);
    assert_eq!(channel.messages(), vec!["gw is DOWN"]);
    assert!(queue.is_empty().unwrap());

    assert_eq!(dispatcher.flush().await.unwrap(), 0);
    assert_eq!(channel.count(), 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flush_keeps_order_and_stops_at_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = AlertQueue::open(dir.path()).unwrap();
    for message in ["first", "second", "third"] {
        queue
            .push(&AlertEvent::new(AlertKind::Loss, "gw", message))
            .unwrap();
    }

    let channel = RecordingChannel::new();
    channel.fail_with(DeliveryError::RateLimited);
    let dispatcher = spawn(dir.path(), &channel, 0);

    assert_eq!(dispatcher.flush().await.unwrap(), 0);
    assert_eq!(queue.len().unwrap(), 3);

    channel.recover();
    assert_eq!(dispatcher.flush().await.unwrap(), 3);
    assert_eq!(channel.messages(), vec!["first", "second", "third"]);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_expired_alerts_are_never_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = AlertQueue::open(dir.path()).unwrap();
    queue
        .push(
            &AlertEvent::new(AlertKind::Down, "gw", "stale")
                .at(Utc::now() - chrono::Duration::hours(25)),
        )
        .unwrap();
    queue
        .push(&AlertEvent::new(AlertKind::Down, "gw", "fresh"))
        .unwrap();

    let channel = RecordingChannel::new();
    let dispatcher = spawn(dir.path(), &channel, 0);

    assert_eq!(dispatcher.expire().await.unwrap(), 1);
    assert_eq!(dispatcher.flush().await.unwrap(), 1);
    assert_eq!(channel.messages(), vec!["fresh"]);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_throttle_window() {
    let dir = tempfile::tempdir().unwrap();
    let channel = RecordingChannel::new();
    let dispatcher = spawn(dir.path(), &channel, 300);

    for _ in 0..2 {
        dispatcher
            .notify(AlertEvent::new(AlertKind::Down, "gw", "down"))
            .await
            .unwrap();
    }
    dispatcher.flush().await.unwrap();
    assert_eq!(channel.count(), 1);
    dispatcher.shutdown().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let channel = RecordingChannel::new();
    let dispatcher = spawn(dir.path(), &channel, 0);

    for _ in 0..2 {
        dispatcher
            .notify(AlertEvent::new(AlertKind::Down, "gw", "down"))
            .await
            .unwrap();
    }
    dispatcher.flush().await.unwrap();
    assert_eq!(channel.count(), 2);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let channel = RecordingChannel::new();
    channel.fail_with(DeliveryError::Auth("401 Unauthorized".into()));

    let dispatcher = spawn(dir.path(), &channel, 0);
    dispatcher
        .notify(AlertEvent::new(AlertKind::Recovery, "gw", "gw is back UP"))
        .await
        .unwrap();
    assert_eq!(dispatcher.flush().await.unwrap(), 0);
    dispatcher.shutdown().await.unwrap();

    let channel = RecordingChannel::new();
    let dispatcher = spawn(dir.path(), &channel, 0);
    assert_eq!(dispatcher.flush().await.unwrap(), 1);
    assert_eq!(channel.kinds(), vec![AlertKind::Recovery]);

    dispatcher.shutdown().await.unwrap();
}
