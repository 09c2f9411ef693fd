//! Durable queue of undelivered alerts
//!
//! One JSON file per alert under `<state_dir>/queue/`, named
//! `<enqueue unix nanos>-<sequence>.json` so that a lexical sort yields insertion order.
//! Files are written to a `.tmp` sibling first and renamed into place, so a crash never
//! leaves a half-written entry behind.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::actors::messages::AlertEvent;

pub const QUEUE_DIR: &str = "queue";

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug)]
pub enum QueueError {
    /// File system access failed
    Io(std::io::Error),

    /// An alert could not be encoded
    Serialization(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Io(err) => write!(f, "alert queue I/O error: {}", err),
            QueueError::Serialization(msg) => write!(f, "alert serialization error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Io(err)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// An alert waiting on disk for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAlert {
    pub path: PathBuf,
    pub event: AlertEvent,
}

#[derive(Debug)]
pub struct AlertQueue {
    dir: PathBuf,
    seq: u64,
}

impl AlertQueue {
    /// Open (and create if needed) the queue below `state_dir`
    pub fn open(state_dir: impl AsRef<Path>) -> QueueResult<Self> {
        let dir = state_dir.as_ref().join(QUEUE_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, seq: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn push(&mut self, event: &AlertEvent) -> QueueResult<PathBuf> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.seq += 1;

        let path = self.dir.join(format!("{nanos:020}-{:06}.json", self.seq));
        let tmp = path.with_extension("tmp");

        let content = serde_json::to_vec(event)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;

        debug!("queued {} alert for {} at {}", event.kind, event.target, path.display());
        Ok(path)
    }

    /// All readable entries in insertion order
    ///
    /// Entries that cannot be decoded are deleted, they would block the queue forever.
    pub fn entries(&self) -> QueueResult<Vec<QueuedAlert>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut alerts = Vec::with_capacity(paths.len());
        for path in paths {
            let decoded = std::fs::read(&path)
                .map_err(QueueError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<AlertEvent>(&bytes)?));

            match decoded {
                Ok(event) => alerts.push(QueuedAlert { path, event }),
                Err(e) => {
                    warn!("dropping unreadable queued alert {}: {e}", path.display());
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("failed to remove {}: {e}", path.display());
                    }
                }
            }
        }

        Ok(alerts)
    }

    pub fn remove(&self, alert: &QueuedAlert) -> QueueResult<()> {
        match std::fs::remove_file(&alert.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove entries whose alert timestamp is older than `before`
    pub fn expire(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        let mut removed = 0;
        for alert in self.entries()? {
            if alert.event.timestamp < before {
                trace!("expiring queued alert {}", alert.path.display());
                self.remove(&alert)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> QueueResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete leftover temporary files from interrupted writes
    pub fn remove_temporary_files(&self) -> QueueResult<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
