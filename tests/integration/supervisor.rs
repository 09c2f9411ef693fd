//! Supervisor startup and the shutdown sequence

use pingguard::actors::supervisor::{PID_FILE, Supervisor};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_shutdown_is_complete_and_idempotent() {
    let harness = Harness::new();
    let state_dir = tempfile::tempdir().unwrap();
    std::fs::write(state_dir.path().join("grace_until.tmp"), "").unwrap();

    let (spawner, _probes) = ChannelSpawner::with_probes(2);
    let targets = vec![target("10.0.2.1", 3), target("10.0.2.2", 3)];

    let mut supervisor =
        Supervisor::start(&targets, harness.context(spawner), Some(state_dir.path())).unwrap();
    assert!(state_dir.path().join(PID_FILE).exists());
    assert_eq!(supervisor.monitors().len(), 2);

    let report = supervisor.shutdown().await;
    assert_eq!(report.probes_stopped, 2);
    assert_eq!(report.monitors_stopped, 2);
    assert_eq!(report.monitors_aborted, 0);
    assert_eq!(report.orphans_swept, 0);
    assert_eq!(report.files_removed, 2);
    assert!(report.clean);
    assert!(!state_dir.path().join(PID_FILE).exists());
    assert!(supervisor.registry().is_empty());

    let again = supervisor.shutdown().await;
    assert!(again.clean);
    assert_eq!(again.monitors_stopped, 0);
}

#[tokio::test]
async fn test_monitors_without_probes_still_shut_down() {
    let harness = Harness::new();
    // no probe sources at all, every spawn fails and is retried
    let (spawner, _probes) = ChannelSpawner::with_probes(0);

    let mut supervisor =
        Supervisor::start(&[target("10.0.2.3", 3)], harness.context(spawner), None).unwrap();

    let report = supervisor.shutdown().await;
    assert_eq!(report.monitors_stopped, 1);
    assert!(report.clean);
}
