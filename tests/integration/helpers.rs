//! Helper types for integration tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use pingguard::actors::connectivity::{ConnectivityHandle, ConnectivitySettings};
use pingguard::actors::dispatcher::{DispatchSettings, DispatcherHandle};
use pingguard::actors::messages::AlertKind;
use pingguard::actors::supervisor::ProcessRegistry;
use pingguard::actors::target_monitor::MonitorContext;
use pingguard::checks::ConnectivityCheck;
use pingguard::config::TargetConfig;
use pingguard::hooks::MonitorHooks;
use pingguard::monitor::StatusLine;
use pingguard::notify::{DeliveryError, NotificationChannel};
use pingguard::probe::{ChannelSource, LineSource, ProbeSpawner};
use pingguard::queue::AlertQueue;
use pingguard::shared::SharedState;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Channel that records deliveries and can be switched to failing
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(AlertKind, String, String)>>,
    failure: Mutex<Option<DeliveryError>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, error: DeliveryError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn kinds(&self) -> Vec<AlertKind> {
        self.sent.lock().unwrap().iter().map(|(kind, ..)| *kind).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(
        &self,
        target: &str,
        message: &str,
        kind: AlertKind,
    ) -> Result<(), DeliveryError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent
            .lock()
            .unwrap()
            .push((kind, target.to_string(), message.to_string()));
        Ok(())
    }
}

/// Connectivity check controlled by the test
pub struct Switch(pub Arc<AtomicBool>);

#[async_trait]
impl ConnectivityCheck for Switch {
    fn name(&self) -> &'static str {
        "switch"
    }

    async fn check(&self) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            bail!("switched off")
        }
    }
}

/// Connectivity check that hangs like a cascade timing out on every host
pub struct Stall(pub Duration);

#[async_trait]
impl ConnectivityCheck for Stall {
    fn name(&self) -> &'static str {
        "stall"
    }

    async fn check(&self) -> Result<()> {
        tokio::time::sleep(self.0).await;
        bail!("timed out")
    }
}

/// Hands out pre-built channel sources, one per spawn
#[derive(Default)]
pub struct ChannelSpawner {
    sources: Mutex<VecDeque<ChannelSource>>,
}

impl ChannelSpawner {
    /// Returns the spawner and one line sender per future probe
    pub fn with_probes(count: usize) -> (Arc<Self>, Vec<mpsc::Sender<String>>) {
        let spawner = Arc::new(Self::default());
        let senders = (0..count)
            .map(|_| {
                let (tx, rx) = mpsc::channel(64);
                spawner
                    .sources
                    .lock()
                    .unwrap()
                    .push_back(ChannelSource::new(rx));
                tx
            })
            .collect();
        (spawner, senders)
    }
}

impl ProbeSpawner for ChannelSpawner {
    fn spawn(&self, _target: &TargetConfig) -> Result<Box<dyn LineSource>> {
        let source = self
            .sources
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no more probes"))?;
        Ok(Box::new(source))
    }

    fn program(&self) -> &Path {
        Path::new("pingguard-test-probe")
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    pub reports: Mutex<Vec<StatusLine>>,
}

impl MonitorHooks for RecordingHooks {
    fn on_report(&self, _target: &str, status: &StatusLine) {
        self.reports.lock().unwrap().push(status.clone());
    }
}

pub fn dispatch_settings(throttle_secs: i64) -> DispatchSettings {
    DispatchSettings {
        throttle: chrono::Duration::seconds(throttle_secs),
        retention: chrono::Duration::hours(24),
        expire_interval: Duration::from_secs(3600),
        attempts: 2,
        retry_backoff: Duration::from_millis(1),
    }
}

pub fn target(address: &str, threshold: u32) -> TargetConfig {
    TargetConfig {
        consecutive_loss_threshold: threshold,
        report_interval: 3600,
        ..TargetConfig::new(address)
    }
}

pub const REPLY: &str = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=57 time=12.3 ms";
pub const LOST: &str = "no answer yet for icmp_seq=2";

/// A complete daemon wiring without real probes or network checks
pub struct Harness {
    pub dir: TempDir,
    pub shared: Arc<SharedState>,
    pub channel: Arc<RecordingChannel>,
    pub online: Arc<AtomicBool>,
    pub dispatcher: DispatcherHandle,
    pub connectivity: ConnectivityHandle,
    pub hooks: Arc<RecordingHooks>,
}

impl Harness {
    pub fn new() -> Self {
        let online = Arc::new(AtomicBool::new(true));
        Self::with_checks(online.clone(), vec![Box::new(Switch(online))])
    }

    /// `online` is only meaningful if one of `checks` reads it
    pub fn with_checks(online: Arc<AtomicBool>, checks: Vec<Box<dyn ConnectivityCheck>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedState::new());
        let channel = RecordingChannel::new();

        let dispatcher = DispatcherHandle::spawn(
            channel.clone(),
            AlertQueue::open(dir.path()).unwrap(),
            dispatch_settings(0),
        );

        let connectivity = ConnectivityHandle::spawn(
            checks,
            shared.clone(),
            Some(dispatcher.clone()),
            ConnectivitySettings {
                check_interval: Duration::from_secs(3600),
                grace_period: chrono::Duration::seconds(30),
                recheck_debounce: Duration::ZERO,
            },
        );

        Self {
            dir,
            shared,
            channel,
            online,
            dispatcher,
            connectivity,
            hooks: Arc::new(RecordingHooks::default()),
        }
    }

    pub fn context(&self, spawner: Arc<ChannelSpawner>) -> MonitorContext {
        MonitorContext {
            spawner,
            shared: self.shared.clone(),
            connectivity: self.connectivity.clone(),
            dispatcher: self.dispatcher.clone(),
            hooks: self.hooks.clone(),
            registry: ProcessRegistry::new(),
            max_respawn_backoff: Duration::from_secs(1),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
