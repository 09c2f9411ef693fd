//! Host connectivity transitions, grace periods and fleet resets

use std::time::Duration;

use chrono::Utc;
use pingguard::actors::messages::{AlertEvent, AlertKind};
use pingguard::actors::target_monitor::MonitorHandle;
use pingguard::monitor::TargetStatus;
use pingguard::notify::DeliveryError;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_restoration_flushes_queue() {
    let harness = Harness::new();
    harness
        .channel
        .fail_with(DeliveryError::Transport("network unreachable".into()));

    harness
        .dispatcher
        .notify(AlertEvent::new(AlertKind::Down, "gw", "queued while offline"))
        .await
        .unwrap();
    assert_eq!(harness.dispatcher.flush().await.unwrap(), 0);

    harness.set_online(false);
    assert!(!harness.connectivity.check_now().await);

    harness.channel.recover();
    harness.set_online(true);
    assert!(harness.connectivity.check_now().await);

    assert!(wait_until(Duration::from_secs(2), || harness.channel.count() == 1).await);
    assert_eq!(harness.channel.messages(), vec!["queued while offline"]);
    assert!(harness.shared.grace_active(Utc::now()));
}

#[tokio::test]
async fn test_restoration_resets_down_targets() {
    let harness = Harness::new();
    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let (monitor, _task) = MonitorHandle::spawn(target("10.0.1.1", 1), harness.context(spawner));

    probes[0].send(LOST.to_string()).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || harness.channel.count() == 1).await);

    harness.set_online(false);
    assert!(!harness.connectivity.check_now().await);
    harness.set_online(true);
    assert!(harness.connectivity.check_now().await);
    assert_eq!(harness.shared.reset_epoch(), 1);

    // the next line observes the new epoch and the grace window
    probes[0].send(LOST.to_string()).await.unwrap();

    let mut state = monitor.get_state().await.unwrap();
    for _ in 0..100 {
        if state.status == TargetStatus::Grace {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = monitor.get_state().await.unwrap();
    }

    assert_eq!(state.status, TargetStatus::Grace);
    assert_eq!(state.consecutive_loss, 0);
    // no recovery alert for the reset and no second down during grace
    assert_eq!(harness.channel.kinds(), vec![AlertKind::Down]);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lost_notice_is_claimed_once() {
    let harness = Harness::new();

    harness.set_online(false);
    assert!(!harness.connectivity.check_now().await);
    assert!(!harness.connectivity.check_now().await);

    // the detector already claimed it on the first transition
    assert!(!harness.shared.claim_lost_notice());
    assert!(harness.shared.connectivity().last_check.is_some());
}
