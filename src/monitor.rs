//! Per-target state machine
//!
//! Pure bookkeeping: the actor in [`crate::actors::target_monitor`] feeds parsed probe
//! lines, grace deadlines and report ticks in, and acts on the returned transitions.
//!
//! ```text
//!            consecutive_loss >= threshold
//!     ┌────┐ ───────────────────────────▶ ┌──────┐
//!     │ UP │                              │ DOWN │
//!     └────┘ ◀─────────────────────────── └──────┘
//!        ▲           next reply              │
//!        │                                   │
//!        └──────── GRACE (forced UP) ◀───────┘
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actors::messages::{AlertEvent, AlertKind};
use crate::config::TargetConfig;
use crate::metrics::{MetricsSnapshot, RttTracker};
use crate::probe::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStatus {
    Up,
    Down,
    Grace,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetStatus::Up => "UP",
            TargetStatus::Down => "DOWN",
            TargetStatus::Grace => "GRACE",
        };
        write!(f, "{name}")
    }
}

/// Result of looking at the shared grace deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceStatus {
    /// Inside the window, the current line must be skipped
    Active,
    /// The window just elapsed; state was reset once
    Ended,
    Inactive,
}

/// Alert-worthy change produced by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Down {
        consecutive_losses: u32,
        reason: FailureReason,
    },
    Recovery {
        rtt: f64,
    },
    Loss {
        loss_pct: f64,
        threshold: f64,
        interval: Duration,
    },
}

impl Transition {
    pub fn kind(&self) -> AlertKind {
        match self {
            Transition::Down { .. } => AlertKind::Down,
            Transition::Recovery { .. } => AlertKind::Recovery,
            Transition::Loss { .. } => AlertKind::Loss,
        }
    }

    pub fn to_alert(&self, target: &str, now: DateTime<Utc>) -> AlertEvent {
        let message = match self {
            Transition::Down {
                consecutive_losses,
                reason,
            } => format!(
                "{target} is DOWN after {consecutive_losses} consecutive lost probes ({reason})"
            ),
            Transition::Recovery { rtt } => format!("{target} is back UP (rtt {rtt:.1} ms)"),
            Transition::Loss {
                loss_pct,
                threshold,
                interval,
            } => format!(
                "{target} lost {loss_pct:.1}% of probes over the last {}s (threshold {threshold}%)",
                interval.as_secs()
            ),
        };

        AlertEvent::new(self.kind(), target, message).at(now)
    }
}

/// One periodic status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub status: TargetStatus,
    pub lost: u64,
    pub total: u64,
    pub loss_pct: f64,
    pub metrics: MetricsSnapshot,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} loss={}/{} ({:.1}%) {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.target,
            self.status,
            self.lost,
            self.total,
            self.loss_pct,
            self.metrics
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: StatusLine,
    pub transition: Option<Transition>,
}

/// Runtime state of one target as seen from outside the monitor
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub target: String,
    pub status: TargetStatus,
    pub consecutive_loss: u32,
    pub ok_count: u64,
    pub lost_count: u64,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct TargetMachine {
    target: TargetConfig,
    network_ok: bool,
    consecutive_loss: u32,
    ok_count: u64,
    lost_count: u64,
    rtt: RttTracker,
    window_start: DateTime<Utc>,
    in_grace: bool,
    last_grace: Option<DateTime<Utc>>,
    reset_epoch: u64,
}

impl TargetMachine {
    pub fn new(target: TargetConfig, now: DateTime<Utc>) -> Self {
        Self {
            target,
            network_ok: true,
            consecutive_loss: 0,
            ok_count: 0,
            lost_count: 0,
            rtt: RttTracker::new(),
            window_start: now,
            in_grace: false,
            last_grace: None,
            reset_epoch: 0,
        }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn status(&self) -> TargetStatus {
        if self.in_grace {
            TargetStatus::Grace
        } else if self.network_ok {
            TargetStatus::Up
        } else {
            TargetStatus::Down
        }
    }

    pub fn consecutive_loss(&self) -> u32 {
        self.consecutive_loss
    }

    pub fn in_grace(&self) -> bool {
        self.in_grace
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Zero all runtime state and start a new report window
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.network_ok = true;
        self.consecutive_loss = 0;
        self.ok_count = 0;
        self.lost_count = 0;
        self.rtt.reset();
        self.window_start = now;
    }

    /// Apply the shared grace deadline; must run before every line and report
    pub fn observe_grace(&mut self, until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> GraceStatus {
        if let Some(until) = until
            && until > now
            && self.last_grace.is_none_or(|seen| until > seen)
        {
            debug!("{}: adopting grace period until {until}", self.name());
            self.last_grace = Some(until);
        }

        if self.last_grace.is_some_and(|until| now < until) {
            self.in_grace = true;
            self.reset(now);
            return GraceStatus::Active;
        }

        if self.in_grace {
            debug!("{}: grace period ended", self.name());
            self.in_grace = false;
            self.reset(now);
            return GraceStatus::Ended;
        }

        GraceStatus::Inactive
    }

    /// Apply a fleet-wide reset request; returns whether state was zeroed
    pub fn observe_epoch(&mut self, epoch: u64, now: DateTime<Utc>) -> bool {
        if epoch == self.reset_epoch {
            return false;
        }

        self.reset_epoch = epoch;
        self.reset(now);
        true
    }

    pub fn on_reply(&mut self, rtt: f64, ttl: Option<u32>) -> Option<Transition> {
        self.rtt.record(rtt, ttl);
        self.ok_count += 1;
        self.consecutive_loss = 0;

        if self.network_ok {
            return None;
        }

        self.network_ok = true;
        Some(Transition::Recovery { rtt })
    }

    pub fn on_failure(
        &mut self,
        reason: FailureReason,
        local_connectivity: bool,
    ) -> Option<Transition> {
        self.consecutive_loss += 1;
        self.lost_count += 1;

        if !local_connectivity {
            debug!(
                "{}: probe lost ({reason}) while local connectivity is down, not alerting",
                self.name()
            );
            return None;
        }

        if self.network_ok && self.consecutive_loss >= self.target.consecutive_loss_threshold {
            self.network_ok = false;
            return Some(Transition::Down {
                consecutive_losses: self.consecutive_loss,
                reason,
            });
        }

        None
    }

    pub fn report_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.report_deadline()
    }

    pub fn report_deadline(&self) -> DateTime<Utc> {
        self.window_start + self.target.report_duration()
    }

    pub fn loss_percentage(&self) -> f64 {
        let total = self.ok_count + self.lost_count;
        if total == 0 {
            return 0.0;
        }
        self.lost_count as f64 / total as f64 * 100.0
    }

    /// Whether the current window warrants a loss alert (before connectivity is checked)
    pub fn loss_exceeded(&self) -> bool {
        self.network_ok
            && self.ok_count + self.lost_count > 0
            && self.loss_percentage() >= self.target.loss_threshold_pct
    }

    /// Close the report window and start the next one
    pub fn finish_window(&mut self, local_connectivity: bool, now: DateTime<Utc>) -> Report {
        let loss_pct = self.loss_percentage();

        let transition = if self.loss_exceeded() {
            if local_connectivity {
                Some(Transition::Loss {
                    loss_pct,
                    threshold: self.target.loss_threshold_pct,
                    interval: self.target.report_duration(),
                })
            } else {
                debug!(
                    "{}: {loss_pct:.1}% loss while local connectivity is down, not alerting",
                    self.name()
                );
                None
            }
        } else {
            None
        };

        let metrics = if self.network_ok {
            self.rtt.snapshot()
        } else {
            MetricsSnapshot::unavailable()
        };

        let status = StatusLine {
            timestamp: now,
            target: self.name().to_string(),
            status: self.status(),
            lost: self.lost_count,
            total: self.ok_count + self.lost_count,
            loss_pct,
            metrics,
        };

        self.ok_count = 0;
        self.lost_count = 0;
        self.rtt.reset_window();
        self.window_start = now;

        Report { status, transition }
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            target: self.name().to_string(),
            status: self.status(),
            consecutive_loss: self.consecutive_loss,
            ok_count: self.ok_count,
            lost_count: self.lost_count,
            metrics: self.rtt.snapshot(),
        }
    }
}
