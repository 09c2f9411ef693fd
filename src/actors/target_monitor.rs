//! TargetMonitorActor - Follows the probe output of one target
//!
//! The actor owns a probe subprocess and a [`TargetMachine`]. Every output line is
//! checked against the shared grace deadline and reset epoch before it reaches the
//! state machine. Lost probes force a connectivity re-check so that an offline host
//! does not raise alerts for every target.
//!
//! ## Message Flow
//!
//! ```text
//! probe line ─→ epoch/grace ─→ parse ─→ TargetMachine ─→ hooks + Dispatcher
//! report timer ─→ loss check ─→ status line ─→ hooks, Dispatcher flush
//! probe exit ─→ respawn after backoff
//!     ↑
//!     └─── Commands (StopProbe, GetState, Shutdown)
//! ```

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::TargetConfig;
use crate::hooks::MonitorHooks;
use crate::monitor::{GraceStatus, TargetMachine, TargetSnapshot, Transition};
use crate::probe::{LineSource, ProbeLine, ProbeSpawner};
use crate::shared::SharedState;

use super::connectivity::ConnectivityHandle;
use super::dispatcher::DispatcherHandle;
use super::messages::MonitorCommand;
use super::supervisor::ProcessRegistry;

const INITIAL_RESPAWN_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a target monitor shares with the rest of the daemon
#[derive(Clone)]
pub struct MonitorContext {
    pub spawner: Arc<dyn ProbeSpawner>,
    pub shared: Arc<SharedState>,
    pub connectivity: ConnectivityHandle,
    pub dispatcher: DispatcherHandle,
    pub hooks: Arc<dyn MonitorHooks>,
    pub registry: ProcessRegistry,
    pub max_respawn_backoff: Duration,
}

pub struct TargetMonitorActor {
    machine: TargetMachine,

    ctx: MonitorContext,

    probe: Option<Box<dyn LineSource>>,

    /// Set while waiting to restart a dead probe
    respawn_at: Option<Instant>,

    backoff: Duration,

    /// No respawn after an explicit stop
    probe_stopped: bool,

    /// Set once a shutdown command was taken while waiting on a connectivity check
    closing: bool,

    command_rx: mpsc::Receiver<MonitorCommand>,
}

impl TargetMonitorActor {
    pub fn new(
        target: TargetConfig,
        ctx: MonitorContext,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        let mut machine = TargetMachine::new(target, Utc::now());
        machine.observe_epoch(ctx.shared.reset_epoch(), Utc::now());

        Self {
            machine,
            ctx,
            probe: None,
            respawn_at: None,
            backoff: INITIAL_RESPAWN_BACKOFF,
            probe_stopped: false,
            closing: false,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(target_name = %self.machine.name()))]
    pub async fn run(mut self) {
        debug!("starting target monitor actor");

        self.start_probe();

        while !self.closing {
            let report_at = self.report_instant();
            let respawn_at = self.respawn_at;

            tokio::select! {
                line = next_probe_line(&mut self.probe) => match line {
                    Ok(Some(line)) => self.handle_line(&line).await,
                    Ok(None) => self.probe_ended("probe exited").await,
                    Err(e) => self.probe_ended(&format!("failed to read probe output: {e}")).await,
                },

                _ = sleep_until(report_at) => {
                    self.handle_report().await;
                }

                _ = respawn_timer(respawn_at) => {
                    self.respawn_at = None;
                    self.start_probe();
                }

                cmd = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }
            }
        }

        self.stop_probe().await;
        debug!("target monitor actor stopped");
    }

    /// Sets `closing` on shutdown or when every handle is gone
    async fn handle_command(&mut self, cmd: Option<MonitorCommand>) {
        match cmd {
            Some(MonitorCommand::StopProbe { respond_to }) => {
                debug!("received StopProbe command");
                self.probe_stopped = true;
                self.respawn_at = None;
                self.stop_probe().await;
                let _ = respond_to.send(());
            }

            Some(MonitorCommand::GetState { respond_to }) => {
                let _ = respond_to.send(self.machine.snapshot());
            }

            Some(MonitorCommand::Shutdown) => {
                debug!("received shutdown command");
                self.closing = true;
            }

            None => {
                warn!("command channel closed, shutting down");
                self.closing = true;
            }
        }
    }

    /// Forced connectivity check that keeps serving commands while the cascade runs
    ///
    /// `None` if the monitor was told to shut down in the meantime.
    async fn check_connectivity(&mut self) -> Option<bool> {
        let connectivity = self.ctx.connectivity.clone();
        let check = connectivity.check_now();
        tokio::pin!(check);

        loop {
            tokio::select! {
                connected = &mut check => return Some(connected),

                cmd = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                    if self.closing {
                        return None;
                    }
                }
            }
        }
    }

    fn report_instant(&self) -> Instant {
        let remaining = (self.machine.report_deadline() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Instant::now() + remaining
    }

    fn start_probe(&mut self) {
        match self.ctx.spawner.spawn(self.machine.target()) {
            Ok(source) => {
                if let Some(pid) = source.pid() {
                    self.ctx.registry.register(self.machine.name(), pid);
                }
                self.probe = Some(source);
            }
            Err(e) => {
                error!("failed to start probe: {:#}", e);
                self.schedule_respawn();
            }
        }
    }

    async fn stop_probe(&mut self) {
        if let Some(mut probe) = self.probe.take() {
            probe.terminate().await;
            self.ctx.registry.unregister(self.machine.name());
        }
    }

    async fn probe_ended(&mut self, reason: &str) {
        self.stop_probe().await;

        if self.probe_stopped {
            return;
        }

        warn!("{reason}, restarting in {:?}", self.backoff);
        self.schedule_respawn();
    }

    fn schedule_respawn(&mut self) {
        self.respawn_at = Some(Instant::now() + self.backoff);
        let max = self.ctx.max_respawn_backoff.max(INITIAL_RESPAWN_BACKOFF);
        self.backoff = (self.backoff * 2).min(max);
    }

    /// Apply a pending fleet reset and the grace deadline; `true` if the input must be skipped
    fn intercept(&mut self) -> bool {
        let now = Utc::now();

        if self.machine.observe_epoch(self.ctx.shared.reset_epoch(), now) {
            debug!("runtime state reset after connectivity restoration");
        }

        match self.machine.observe_grace(self.ctx.shared.grace_until(), now) {
            GraceStatus::Active => true,
            GraceStatus::Ended | GraceStatus::Inactive => false,
        }
    }

    async fn handle_line(&mut self, line: &str) {
        if self.intercept() {
            trace!("grace period active, skipping: {line}");
            return;
        }

        match ProbeLine::parse(line) {
            ProbeLine::Reply { rtt, ttl, .. } => {
                self.backoff = INITIAL_RESPAWN_BACKOFF;
                if let Some(transition) = self.machine.on_reply(rtt, ttl) {
                    self.emit(transition).await;
                }
            }
            ProbeLine::Failure(reason) => {
                let Some(connected) = self.check_connectivity().await else {
                    return;
                };

                // connectivity may have come back while we were waiting
                if self.intercept() {
                    return;
                }

                if let Some(transition) = self.machine.on_failure(reason, connected) {
                    self.emit(transition).await;
                }
            }
            ProbeLine::Other => trace!("ignoring probe output: {line}"),
        }
    }

    async fn handle_report(&mut self) {
        if self.intercept() {
            trace!("grace period active, report withheld");
            return;
        }

        if !self.machine.report_due(Utc::now()) {
            return;
        }

        let connected = if self.machine.loss_exceeded() {
            match self.check_connectivity().await {
                Some(connected) => connected,
                None => return,
            }
        } else {
            self.ctx.connectivity.is_connected()
        };

        let report = self.machine.finish_window(connected, Utc::now());
        self.ctx
            .hooks
            .on_report(self.machine.name(), &report.status);

        if let Some(transition) = report.transition {
            self.emit(transition).await;
        }

        self.ctx.dispatcher.request_flush();
    }

    async fn emit(&mut self, transition: Transition) {
        let name = self.machine.name();

        match &transition {
            Transition::Down {
                consecutive_losses,
                reason,
            } => self.ctx.hooks.on_down(name, *consecutive_losses, *reason),
            Transition::Recovery { rtt } => self.ctx.hooks.on_recovery(name, *rtt),
            Transition::Loss {
                loss_pct, interval, ..
            } => self.ctx.hooks.on_loss(name, *loss_pct, *interval),
        }

        let event = transition.to_alert(name, Utc::now());
        if let Err(e) = self.ctx.dispatcher.notify(event).await {
            error!("failed to hand alert to dispatcher: {:#}", e);
        }
    }
}

async fn next_probe_line(
    probe: &mut Option<Box<dyn LineSource>>,
) -> std::io::Result<Option<String>> {
    match probe {
        Some(probe) => probe.next_line().await,
        None => pending().await,
    }
}

async fn respawn_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

/// Handle for controlling a TargetMonitorActor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,

    /// Display name of the monitored target
    pub name: String,
}

impl MonitorHandle {
    /// Spawn a new monitor; the join handle lets the caller wait for it to finish
    pub fn spawn(target: TargetConfig, ctx: MonitorContext) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let name = target.name().to_string();

        let actor = TargetMonitorActor::new(target, ctx, cmd_rx);

        let task = tokio::spawn(actor.run());

        (
            Self {
                sender: cmd_tx,
                name,
            },
            task,
        )
    }

    /// Terminate the probe subprocess; the monitor keeps running without it
    pub async fn stop_probe(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::StopProbe { respond_to: tx })
            .await
            .context("failed to send StopProbe command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn get_state(&self) -> Result<TargetSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
