//! Probe output flowing through a target monitor into the dispatcher

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::Utc;
use pingguard::actors::messages::AlertKind;
use pingguard::actors::target_monitor::MonitorHandle;
use pingguard::config::TargetConfig;
use pingguard::monitor::TargetStatus;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_down_then_recovery() {
    let harness = Harness::new();
    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let (monitor, _task) = MonitorHandle::spawn(target("10.0.0.1", 2), harness.context(spawner));

    for _ in 0..3 {
        probes[0].send(LOST.to_string()).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || harness.channel.count() == 1).await);

    probes[0].send(REPLY.to_string()).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || harness.channel.count() == 2).await);

    assert_eq!(
        harness.channel.kinds(),
        vec![AlertKind::Down, AlertKind::Recovery]
    );
    assert_eq!(
        harness.channel.messages()[0],
        "10.0.0.1 is DOWN after 2 consecutive lost probes (Timeout)"
    );

    let state = monitor.get_state().await.unwrap();
    assert_eq!(state.status, TargetStatus::Up);
    assert_eq!(state.consecutive_loss, 0);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_alerts_while_host_is_offline() {
    let harness = Harness::new();
    harness.set_online(false);

    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let (monitor, _task) = MonitorHandle::spawn(target("10.0.0.2", 2), harness.context(spawner));

    for _ in 0..5 {
        probes[0].send(LOST.to_string()).await.unwrap();
    }

    let mut consecutive_loss = 0;
    for _ in 0..100 {
        consecutive_loss = monitor.get_state().await.unwrap().consecutive_loss;
        if consecutive_loss == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(consecutive_loss, 5);
    assert_eq!(harness.channel.count(), 0);
    assert!(!harness.connectivity.is_connected());

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_grace_period_skips_lines() {
    let harness = Harness::new();
    harness
        .shared
        .begin_grace(Utc::now(), chrono::Duration::seconds(30));

    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let (monitor, _task) = MonitorHandle::spawn(target("10.0.0.3", 1), harness.context(spawner));

    for _ in 0..3 {
        probes[0].send(LOST.to_string()).await.unwrap();
    }

    let mut status = TargetStatus::Up;
    for _ in 0..100 {
        status = monitor.get_state().await.unwrap().status;
        if status == TargetStatus::Grace {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // give the remaining lines a chance to be consumed
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = monitor.get_state().await.unwrap();
    assert_eq!(status, TargetStatus::Grace);
    assert_eq!(state.consecutive_loss, 0);
    assert_eq!(state.lost_count, 0);
    assert_eq!(harness.channel.count(), 0);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_probe_is_respawned_after_exit() {
    let harness = Harness::new();
    let (spawner, mut probes) = ChannelSpawner::with_probes(2);
    let (monitor, _task) = MonitorHandle::spawn(target("10.0.0.4", 1), harness.context(spawner));

    // closing the first probe's output looks like the process exiting
    let second = probes.pop().unwrap();
    drop(probes);

    second.send(LOST.to_string()).await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || harness.channel.count() == 1).await);
    assert_eq!(harness.channel.kinds(), vec![AlertKind::Down]);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_loss_alert_at_report() {
    let harness = Harness::new();
    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let target = TargetConfig {
        consecutive_loss_threshold: 10,
        loss_threshold_pct: 20.0,
        report_interval: 1,
        ..TargetConfig::new("10.0.0.5")
    };
    let (monitor, _task) = MonitorHandle::spawn(target, harness.context(spawner));

    probes[0].send(REPLY.to_string()).await.unwrap();
    probes[0].send(LOST.to_string()).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || harness.channel.kinds()
            == vec![AlertKind::Loss])
        .await
    );

    let reports = harness.hooks.reports.lock().unwrap().clone();
    let loss_report = reports
        .iter()
        .find(|report| report.total > 0)
        .expect("a report covering the probes");
    assert_eq!(loss_report.lost, 1);
    assert_eq!(loss_report.total, 2);
    assert_eq!(loss_report.status, TargetStatus::Up);
    assert!(loss_report.to_string().contains("10.0.0.5 UP loss=1/2 (50.0%)"));

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_probe_prevents_respawn() {
    let harness = Harness::new();
    let (spawner, probes) = ChannelSpawner::with_probes(2);
    let (monitor, task) = MonitorHandle::spawn(target("10.0.0.6", 1), harness.context(spawner));

    monitor.stop_probe().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // the second probe was never started, so its receiver is still open
    assert!(!probes[1].is_closed());
    assert_eq!(harness.channel.count(), 0);

    monitor.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_commands_are_served_during_slow_connectivity_check() {
    let harness = Harness::with_checks(
        Arc::new(AtomicBool::new(false)),
        vec![Box::new(Stall(Duration::from_secs(60)))],
    );
    let (spawner, probes) = ChannelSpawner::with_probes(1);
    let (monitor, task) = MonitorHandle::spawn(target("10.0.0.7", 1), harness.context(spawner));

    // the lost probe forces a connectivity check that will not finish in time
    probes[0].send(LOST.to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(2), monitor.stop_probe())
        .await
        .expect("stop_probe answered while the check was running")
        .unwrap();
    assert!(probes[0].is_closed());

    let state = tokio::time::timeout(Duration::from_secs(2), monitor.get_state())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, TargetStatus::Up);

    monitor.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(harness.channel.count(), 0);
}
