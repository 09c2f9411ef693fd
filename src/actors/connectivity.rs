//! ConnectivityActor - Detects whether the monitoring host itself is online
//!
//! Runs the check cascade on a fixed interval and on demand. Target monitors ask for a
//! forced check whenever a probe is lost, so that an outage of the host's own uplink
//! is not reported as an outage of every target.
//!
//! ## Transitions
//!
//! ```text
//! offline → online: open grace period, reset every target, one "restored" notice,
//!                   flush the alert queue
//! online → offline: clear notices, one "lost" notice; target alerts stay quiet
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use crate::checks::{ConnectivityCheck, run_cascade};
use crate::config::ConnectivityConfig;
use crate::shared::{SharedState, Transition};

use super::dispatcher::DispatcherHandle;
use super::messages::ConnectivityCommand;

#[derive(Debug, Clone)]
pub struct ConnectivitySettings {
    pub check_interval: Duration,
    pub grace_period: chrono::Duration,
    /// Forced checks this soon after the last completed one reuse its result
    pub recheck_debounce: Duration,
}

impl From<&ConnectivityConfig> for ConnectivitySettings {
    fn from(config: &ConnectivityConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval.max(1)),
            grace_period: chrono::Duration::seconds(config.grace_period as i64),
            recheck_debounce: Duration::from_secs(config.recheck_debounce),
        }
    }
}

pub struct ConnectivityActor {
    checks: Vec<Box<dyn ConnectivityCheck>>,

    shared: Arc<SharedState>,

    /// Flushed right after connectivity comes back
    dispatcher: Option<DispatcherHandle>,

    settings: ConnectivitySettings,

    last_completed: Option<Instant>,

    command_rx: mpsc::Receiver<ConnectivityCommand>,
}

impl ConnectivityActor {
    pub fn new(
        checks: Vec<Box<dyn ConnectivityCheck>>,
        shared: Arc<SharedState>,
        dispatcher: Option<DispatcherHandle>,
        settings: ConnectivitySettings,
        command_rx: mpsc::Receiver<ConnectivityCommand>,
    ) -> Self {
        Self {
            checks,
            shared,
            dispatcher,
            settings,
            last_completed: None,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting connectivity actor");

        self.perform_check().await;

        let start = Instant::now() + self.settings.check_interval;
        let mut ticker = interval_at(start, self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.perform_check().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ConnectivityCommand::CheckNow { respond_to } => {
                            let connected = self.forced_check().await;
                            let _ = respond_to.send(connected);
                        }

                        ConnectivityCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("connectivity actor stopped");
    }

    async fn forced_check(&mut self) -> bool {
        if let Some(last) = self.last_completed
            && last.elapsed() < self.settings.recheck_debounce
        {
            trace!("reusing connectivity result from {:?} ago", last.elapsed());
            return self.shared.connectivity().local_connectivity;
        }

        self.perform_check().await
    }

    async fn perform_check(&mut self) -> bool {
        let connected = run_cascade(&self.checks).await;
        let now = Utc::now();
        self.last_completed = Some(Instant::now());

        match self.shared.set_connectivity(connected, now) {
            Some(Transition::Restored) => {
                let until = self.shared.begin_grace(now, self.settings.grace_period);
                let epoch = self.shared.request_fleet_reset();
                self.shared.clear_lost_notice();

                if self.shared.claim_restored_notice() {
                    info!("local connectivity restored, target alerts suppressed until {until}");
                }
                debug!("requested fleet reset (epoch {epoch})");

                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.request_flush();
                }
            }
            Some(Transition::Lost) => {
                self.shared.clear_restored_notice();

                if self.shared.claim_lost_notice() {
                    warn!("local connectivity lost, target alerts suppressed");
                }
            }
            None => trace!("local connectivity unchanged: {connected}"),
        }

        connected
    }
}

/// Handle for controlling a ConnectivityActor
#[derive(Clone)]
pub struct ConnectivityHandle {
    sender: mpsc::Sender<ConnectivityCommand>,

    shared: Arc<SharedState>,
}

impl ConnectivityHandle {
    pub fn spawn(
        checks: Vec<Box<dyn ConnectivityCheck>>,
        shared: Arc<SharedState>,
        dispatcher: Option<DispatcherHandle>,
        settings: ConnectivitySettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = ConnectivityActor::new(checks, shared.clone(), dispatcher, settings, cmd_rx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            shared,
        }
    }

    /// Force a (debounced) connectivity check
    ///
    /// Falls back to the last known state if the detector is gone.
    pub async fn check_now(&self) -> bool {
        match self.request_check().await {
            Ok(connected) => connected,
            Err(e) => {
                debug!("forced connectivity check unavailable: {e:#}");
                self.is_connected()
            }
        }
    }

    async fn request_check(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectivityCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        rx.await.context("failed to receive response")
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connectivity().local_connectivity
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ConnectivityCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
