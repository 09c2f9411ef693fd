//! AlertDispatcherActor - Delivers alerts, queueing what cannot be delivered
//!
//! The dispatcher is the single owner of the notification channel and the on-disk
//! queue, so delivery attempts are naturally serialized.
//!
//! ## Message Flow
//!
//! ```text
//! Notify → throttle check → send (with retries) ─ ok ──→ update throttle record
//!                                               └ err ─→ persist to queue
//!
//! Flush  → for each queued alert (oldest first): expired ─→ remove, next
//!                                                 send ─ ok ──→ remove, next
//!                                                      └ err ─→ stop
//!
//! Expire timer → drop queued alerts older than the retention window
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::AlertsConfig;
use crate::notify::{DeliveryError, NotificationChannel};
use crate::queue::AlertQueue;

use super::messages::{AlertEvent, AlertKind, DispatcherCommand};

/// Base delay between two delivery attempts; grows linearly per attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Zero disables throttling
    pub throttle: chrono::Duration,
    pub retention: chrono::Duration,
    pub expire_interval: Duration,
    /// Delivery attempts for transport errors, at least one
    pub attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&AlertsConfig> for DispatchSettings {
    fn from(config: &AlertsConfig) -> Self {
        Self {
            throttle: chrono::Duration::seconds(config.throttle_secs as i64),
            retention: chrono::Duration::hours(config.retention_hours as i64),
            expire_interval: Duration::from_secs(config.expire_interval_secs.max(1)),
            attempts: config.retries.max(1),
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// Last successful delivery per `(kind, target)`
#[derive(Debug, Default)]
pub struct Throttle {
    window: chrono::Duration,
    last_sent: HashMap<(AlertKind, String), DateTime<Utc>>,
}

impl Throttle {
    pub fn new(window: chrono::Duration) -> Self {
        Self {
            window,
            last_sent: HashMap::new(),
        }
    }

    pub fn allows(&self, event: &AlertEvent) -> bool {
        if self.window <= chrono::Duration::zero() {
            return true;
        }

        self.last_sent
            .get(&(event.kind, event.target.clone()))
            .is_none_or(|last| event.timestamp - *last >= self.window)
    }

    pub fn record(&mut self, event: &AlertEvent) {
        let key = (event.kind, event.target.clone());
        let entry = self.last_sent.entry(key).or_insert(event.timestamp);
        if event.timestamp > *entry {
            *entry = event.timestamp;
        }
    }
}

pub struct AlertDispatcherActor {
    channel: Arc<dyn NotificationChannel>,

    queue: AlertQueue,

    throttle: Throttle,

    settings: DispatchSettings,

    command_rx: mpsc::Receiver<DispatcherCommand>,

    /// Auth/config failures are logged loudly only once until a delivery succeeds
    persistent_error_reported: bool,
}

impl AlertDispatcherActor {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        queue: AlertQueue,
        settings: DispatchSettings,
        command_rx: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            channel,
            queue,
            throttle: Throttle::new(settings.throttle),
            settings,
            command_rx,
            persistent_error_reported: false,
        }
    }

    #[instrument(skip(self), fields(channel = self.channel.name()))]
    pub async fn run(mut self) {
        debug!("starting alert dispatcher actor");

        let start = tokio::time::Instant::now() + self.settings.expire_interval;
        let mut expire_ticker = interval_at(start, self.settings.expire_interval);
        expire_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = expire_ticker.tick() => {
                    if let Err(e) = self.expire() {
                        error!("failed to expire queued alerts: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        DispatcherCommand::Notify { event } => {
                            self.notify(event).await;
                        }

                        DispatcherCommand::Flush { respond_to } => {
                            let result = self.flush().await;
                            match respond_to {
                                Some(tx) => {
                                    let _ = tx.send(result);
                                }
                                None => {
                                    if let Err(e) = result {
                                        error!("failed to flush alert queue: {:#}", e);
                                    }
                                }
                            }
                        }

                        DispatcherCommand::Expire { respond_to } => {
                            let result = self.expire();
                            match respond_to {
                                Some(tx) => {
                                    let _ = tx.send(result);
                                }
                                None => {
                                    if let Err(e) = result {
                                        error!("failed to expire queued alerts: {:#}", e);
                                    }
                                }
                            }
                        }

                        DispatcherCommand::Shutdown => {
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

        debug!("alert dispatcher actor stopped");
    }

    #[instrument(skip(self, event), fields(target_name = %event.target, kind = %event.kind))]
    async fn notify(&mut self, event: AlertEvent) {
        if !self.throttle.allows(&event) {
            debug!("throttled: {}", event.message);
            return;
        }

        match self.deliver(&event).await {
            Ok(()) => {
                self.throttle.record(&event);
            }
            Err(_) => match self.queue.push(&event) {
                Ok(_) => debug!("alert queued for later delivery"),
                Err(e) => error!("failed to queue alert, it is lost: {e}"),
            },
        }
    }

    async fn flush(&mut self) -> Result<usize> {
        let entries = self.queue.entries().context("failed to read alert queue")?;
        if entries.is_empty() {
            return Ok(0);
        }

        trace!("flushing {} queued alerts", entries.len());
        let cutoff = Utc::now() - self.settings.retention;
        let mut delivered = 0;
        let mut expired = 0;

        for alert in entries {
            if alert.event.timestamp < cutoff {
                self.queue
                    .remove(&alert)
                    .with_context(|| format!("failed to remove {}", alert.path.display()))?;
                expired += 1;
                continue;
            }

            if self.deliver(&alert.event).await.is_err() {
                debug!("flush stopped after {delivered} alerts");
                break;
            }

            self.queue
                .remove(&alert)
                .with_context(|| format!("failed to remove {}", alert.path.display()))?;
            self.throttle.record(&alert.event);
            delivered += 1;
        }

        if expired > 0 {
            warn!("dropped {expired} undelivered alerts older than {cutoff}");
        }
        if delivered > 0 {
            info!("delivered {delivered} queued alerts");
        }

        Ok(delivered)
    }

    fn expire(&mut self) -> Result<usize> {
        let cutoff = Utc::now() - self.settings.retention;
        let removed = self
            .queue
            .expire(cutoff)
            .context("failed to expire alert queue")?;

        if removed > 0 {
            warn!("dropped {removed} undelivered alerts older than {cutoff}");
        }

        Ok(removed)
    }

    async fn deliver(&mut self, event: &AlertEvent) -> Result<(), DeliveryError> {
        let mut attempt = 1;

        loop {
            let result = self
                .channel
                .send(&event.target, &event.message, event.kind)
                .await;

            match result {
                Ok(()) => {
                    self.persistent_error_reported = false;
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.settings.attempts => {
                    debug!("delivery attempt {attempt} failed: {e}");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.report_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    fn report_failure(&mut self, error: &DeliveryError) {
        if !error.is_persistent() {
            warn!("alert delivery failed: {error}");
            return;
        }

        if self.persistent_error_reported {
            debug!("alert delivery failed: {error}");
        } else {
            error!("alert delivery failed, check the channel configuration: {error}");
            self.persistent_error_reported = true;
        }
    }
}

/// Handle for controlling an AlertDispatcherActor
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    pub fn spawn(
        channel: Arc<dyn NotificationChannel>,
        queue: AlertQueue,
        settings: DispatchSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = AlertDispatcherActor::new(channel, queue, settings, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn notify(&self, event: AlertEvent) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Notify { event })
            .await
            .context("failed to send Notify command")
    }

    /// Deliver queued alerts now and wait for the outcome
    pub async fn flush(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Flush {
                respond_to: Some(tx),
            })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive response")?
    }

    /// Fire-and-forget flush; skipped if the dispatcher is busy
    pub fn request_flush(&self) {
        if let Err(e) = self
            .sender
            .try_send(DispatcherCommand::Flush { respond_to: None })
        {
            trace!("flush request not queued: {e}");
        }
    }

    pub async fn expire(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Expire {
                respond_to: Some(tx),
            })
            .await
            .context("failed to send Expire command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
