use async_trait::async_trait;
use tracing::{info, warn};

use crate::actors::messages::AlertKind;

use super::{DeliveryError, NotificationChannel};

/// Writes alerts to the log; used when no remote channel is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        target: &str,
        message: &str,
        kind: AlertKind,
    ) -> Result<(), DeliveryError> {
        match kind {
            AlertKind::Recovery => info!(target_name = target, "ALERT [{kind}] {message}"),
            AlertKind::Down | AlertKind::Loss => {
                warn!(target_name = target, "ALERT [{kind}] {message}")
            }
        }
        Ok(())
    }
}
