//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: `AlertEvent`s flow from target monitors into the dispatcher
//! 3. **Immutability**: All events are cloneable and serializable so they can be queued on disk

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::monitor::TargetSnapshot;

/// Category of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Down,
    Loss,
    Recovery,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::Down => "down",
            AlertKind::Loss => "loss",
            AlertKind::Recovery => "recovery",
        };
        write!(f, "{name}")
    }
}

/// A discrete alert produced by a target monitor
///
/// This is also the on-disk layout of a queued alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "alert_type")]
    pub kind: AlertKind,

    /// Display name of the target
    pub target: String,

    pub message: String,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, target: impl ToString, message: impl ToString) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Commands that can be sent to the ConnectivityActor
#[derive(Debug)]
pub enum ConnectivityCommand {
    /// Run the check cascade now (subject to the re-check debounce)
    CheckNow { respond_to: oneshot::Sender<bool> },

    /// Gracefully shut down the detector
    Shutdown,
}

/// Commands that can be sent to the AlertDispatcherActor
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Deliver (or queue) a single alert
    Notify { event: AlertEvent },

    /// Deliver queued alerts in order, stopping at the first failure
    ///
    /// Responds with the number of delivered alerts.
    Flush {
        respond_to: Option<oneshot::Sender<anyhow::Result<usize>>>,
    },

    /// Drop queued alerts older than the retention window
    ///
    /// Responds with the number of removed alerts.
    Expire {
        respond_to: Option<oneshot::Sender<anyhow::Result<usize>>>,
    },

    /// Gracefully shut down the dispatcher
    Shutdown,
}

/// Commands that can be sent to a TargetMonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Terminate the probe subprocess without stopping the monitor
    ///
    /// No respawn happens afterwards.
    StopProbe { respond_to: oneshot::Sender<()> },

    /// Get the current runtime state of the target
    GetState {
        respond_to: oneshot::Sender<TargetSnapshot>,
    },

    /// Gracefully shut down the monitor
    Shutdown,
}
