//! State shared between the connectivity detector and every target monitor
//!
//! The detector is the only writer; monitors read on every probe line. The grace
//! deadline lives in an atomic, the connectivity pair is replaced as a whole under a
//! lock, so readers never observe a partial update.
//!
//! When a state directory is configured, the grace deadline and the connectivity
//! pair are also written to disk (write to a temporary file, then rename). Both are
//! picked up again on load unless they were written more than two minutes ago.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Persisted values older than this are leftovers from a previous run
pub const STALE_AFTER_SECS: i64 = 120;

const GRACE_FILE: &str = "grace_until";
const CONNECTIVITY_FILE: &str = "connectivity.json";

const NO_GRACE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub local_connectivity: bool,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        // assume a working uplink until the first check says otherwise
        Self {
            local_connectivity: true,
            last_check: None,
        }
    }
}

/// Change of host connectivity observed by a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Lost,
    Restored,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraceRecord {
    until: DateTime<Utc>,
    written_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SharedState {
    /// Unix milliseconds, `NO_GRACE` when inactive
    grace_until: AtomicI64,
    connectivity: RwLock<ConnectivityState>,
    reset_epoch: AtomicU64,
    restored_notice: AtomicBool,
    lost_notice: AtomicBool,
    state_dir: Option<PathBuf>,
}

impl SharedState {
    /// In-memory only state
    pub fn new() -> Self {
        Self::default()
    }

    /// State backed by files in `dir`, picking up still-fresh grace and connectivity
    pub fn persistent(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;

        let connectivity = load_connectivity(&dir.join(CONNECTIVITY_FILE), Utc::now());
        if let Some(connectivity) = &connectivity {
            debug!("resuming connectivity state {connectivity:?}");
        }

        let state = Self {
            connectivity: RwLock::new(connectivity.unwrap_or_default()),
            state_dir: Some(dir.clone()),
            ..Self::default()
        };

        if let Some(until) = load_grace(&dir.join(GRACE_FILE), Utc::now()) {
            debug!("resuming grace period until {until}");
            state
                .grace_until
                .store(until.timestamp_millis(), Ordering::Release);
        }

        Ok(state)
    }

    pub fn grace_until(&self) -> Option<DateTime<Utc>> {
        match self.grace_until.load(Ordering::Acquire) {
            NO_GRACE => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    pub fn grace_active(&self, now: DateTime<Utc>) -> bool {
        self.grace_until().is_some_and(|until| now < until)
    }

    /// Open a new grace window of `duration` starting at `now`
    pub fn begin_grace(&self, now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
        let until = now + duration;
        self.grace_until
            .store(until.timestamp_millis(), Ordering::Release);

        if let Some(dir) = &self.state_dir {
            let record = GraceRecord {
                until,
                written_at: now,
            };
            if let Err(e) = write_json(&dir.join(GRACE_FILE), &record) {
                warn!("failed to persist grace period: {e:#}");
            }
        }

        until
    }

    pub fn connectivity(&self) -> ConnectivityState {
        match self.connectivity.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Record the outcome of a connectivity check
    ///
    /// Returns the transition if the value flipped.
    pub fn set_connectivity(&self, connected: bool, at: DateTime<Utc>) -> Option<Transition> {
        let next = ConnectivityState {
            local_connectivity: connected,
            last_check: Some(at),
        };

        let previous = {
            let mut guard = match self.connectivity.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, next)
        };

        if let Some(dir) = &self.state_dir
            && let Err(e) = write_json(&dir.join(CONNECTIVITY_FILE), &next)
        {
            warn!("failed to persist connectivity state: {e:#}");
        }

        match (previous.local_connectivity, connected) {
            (true, false) => Some(Transition::Lost),
            (false, true) => Some(Transition::Restored),
            _ => None,
        }
    }

    pub fn reset_epoch(&self) -> u64 {
        self.reset_epoch.load(Ordering::Acquire)
    }

    /// Ask every target monitor to zero its runtime state
    pub fn request_fleet_reset(&self) -> u64 {
        self.reset_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns `true` exactly once until the flag is cleared again
    pub fn claim_restored_notice(&self) -> bool {
        !self.restored_notice.swap(true, Ordering::AcqRel)
    }

    pub fn claim_lost_notice(&self) -> bool {
        !self.lost_notice.swap(true, Ordering::AcqRel)
    }

    pub fn clear_restored_notice(&self) {
        self.restored_notice.store(false, Ordering::Release);
    }

    pub fn clear_lost_notice(&self) {
        self.lost_notice.store(false, Ordering::Release);
    }
}

fn load_grace(path: &Path, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let content = std::fs::read_to_string(path).ok()?;
    let record: GraceRecord = match serde_json::from_str(&content) {
        Ok(record) => record,
        Err(e) => {
            // unreadable means no grace, alerts stay enabled
            warn!("ignoring corrupt grace file {}: {e}", path.display());
            return None;
        }
    };

    if now - record.written_at > Duration::seconds(STALE_AFTER_SECS) {
        trace!("ignoring stale grace record from {}", record.written_at);
        return None;
    }

    (record.until > now).then_some(record.until)
}

fn load_connectivity(path: &Path, now: DateTime<Utc>) -> Option<ConnectivityState> {
    let content = std::fs::read_to_string(path).ok()?;
    let record: ConnectivityState = match serde_json::from_str(&content) {
        Ok(record) => record,
        Err(e) => {
            warn!("ignoring corrupt connectivity file {}: {e}", path.display());
            return None;
        }
    };

    match record.last_check {
        Some(at) if now - at <= Duration::seconds(STALE_AFTER_SECS) => Some(record),
        _ => {
            trace!("ignoring stale connectivity record {record:?}");
            None
        }
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    let content = serde_json::to_vec(value)?;
    std::fs::write(&tmp, content).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
