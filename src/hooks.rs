//! Observer callbacks invoked by target monitors
//!
//! Every method has a no-op default so implementations only override what they need.

use std::time::Duration;

use tracing::info;

use crate::monitor::StatusLine;
use crate::probe::FailureReason;

pub trait MonitorHooks: Send + Sync {
    fn on_down(&self, _target: &str, _consecutive_losses: u32, _reason: FailureReason) {}

    fn on_recovery(&self, _target: &str, _rtt: f64) {}

    fn on_loss(&self, _target: &str, _loss_pct: f64, _interval: Duration) {}

    fn on_report(&self, _target: &str, _status: &StatusLine) {}
}

/// Writes one status line per report window to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusLogger;

impl MonitorHooks for StatusLogger {
    fn on_down(&self, target: &str, consecutive_losses: u32, reason: FailureReason) {
        info!("{target} DOWN after {consecutive_losses} lost probes: {reason}");
    }

    fn on_recovery(&self, target: &str, rtt: f64) {
        info!("{target} recovered, rtt {rtt:.2} ms");
    }

    fn on_loss(&self, target: &str, loss_pct: f64, interval: Duration) {
        info!(
            "{target} packet loss {loss_pct:.1}% over {}s",
            interval.as_secs()
        );
    }

    fn on_report(&self, _target: &str, status: &StatusLine) {
        info!("{status}");
    }
}
