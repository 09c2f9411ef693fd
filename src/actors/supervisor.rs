//! Supervisor - Owns every target monitor and tears the process tree down
//!
//! Shutdown runs in a fixed order and may be called any number of times:
//!
//! 1. stop probe subprocesses through their monitors
//! 2. kill probes that are still registered
//! 3. stop the monitors and wait for their tasks
//! 4. sweep orphaned probes (children of this process running the probe program)
//! 5. remove the pid file and temporary files
//! 6. verify nothing is left behind

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::TargetConfig;
use crate::queue::QUEUE_DIR;

use super::target_monitor::{MonitorContext, MonitorHandle};

pub const PID_FILE: &str = "pingguard.pid";

const STOP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MONITOR_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe process ids by target name
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<String, u32>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self, target: &str, pid: u32) {
        trace!("registering probe {pid} for {target}");
        self.lock().insert(target.to_string(), pid);
    }

    pub fn unregister(&self, target: &str) -> Option<u32> {
        self.lock().remove(target)
    }

    pub fn pids(&self) -> Vec<(String, u32)> {
        self.lock()
            .iter()
            .map(|(target, pid)| (target.clone(), *pid))
            .collect()
    }

    pub fn drain(&self) -> Vec<(String, u32)> {
        self.lock().drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// What a shutdown pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub probes_stopped: usize,
    pub probes_killed: usize,
    pub monitors_stopped: usize,
    pub monitors_aborted: usize,
    pub orphans_swept: usize,
    pub files_removed: usize,
    /// No registered probe and no orphan survived
    pub clean: bool,
}

pub struct Supervisor {
    monitors: Vec<MonitorHandle>,

    tasks: Vec<JoinHandle<()>>,

    registry: ProcessRegistry,

    /// Process name of the probe program, for the orphan sweep
    probe_name: Option<OsString>,

    state_dir: Option<PathBuf>,

    shut_down: bool,
}

impl Supervisor {
    /// Spawn one monitor per target
    pub fn start(
        targets: &[TargetConfig],
        ctx: MonitorContext,
        state_dir: Option<&Path>,
    ) -> Result<Self> {
        if let Some(dir) = state_dir {
            let pid_file = dir.join(PID_FILE);
            std::fs::write(&pid_file, std::process::id().to_string())
                .with_context(|| format!("failed to write {}", pid_file.display()))?;
        }

        let probe_name = ctx.spawner.program().file_name().map(|name| name.to_os_string());
        let registry = ctx.registry.clone();

        let (monitors, tasks): (Vec<_>, Vec<_>) = targets
            .iter()
            .map(|target| {
                debug!("spawning monitor for {}", target.name());
                MonitorHandle::spawn(target.clone(), ctx.clone())
            })
            .unzip();

        info!("monitoring {} targets", targets.len());

        Ok(Self {
            monitors,
            tasks,
            registry,
            probe_name,
            state_dir: state_dir.map(Path::to_path_buf),
            shut_down: false,
        })
    }

    pub fn monitors(&self) -> &[MonitorHandle] {
        &self.monitors
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> ShutdownReport {
        if self.shut_down {
            trace!("shutdown already completed");
            return ShutdownReport {
                clean: true,
                ..Default::default()
            };
        }
        self.shut_down = true;

        let mut report = ShutdownReport::default();

        let stops = join_all(
            self.monitors
                .iter()
                .map(|monitor| timeout(STOP_PROBE_TIMEOUT, monitor.stop_probe())),
        )
        .await;

        for (monitor, result) in self.monitors.iter().zip(stops) {
            match result {
                Ok(Ok(())) => report.probes_stopped += 1,
                Ok(Err(e)) => debug!("could not stop probe of {}: {e:#}", monitor.name),
                Err(_) => warn!("stopping probe of {} timed out", monitor.name),
            }
        }

        for (target, pid) in self.registry.drain() {
            if kill_process(pid) {
                debug!("killed leftover probe {pid} of {target}");
                report.probes_killed += 1;
            }
        }

        for monitor in &self.monitors {
            if let Err(e) = monitor.shutdown().await {
                trace!("monitor {} already gone: {e:#}", monitor.name);
            }
        }

        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            match timeout(MONITOR_EXIT_TIMEOUT, task).await {
                Ok(_) => report.monitors_stopped += 1,
                Err(_) => {
                    abort.abort();
                    report.monitors_aborted += 1;
                }
            }
        }

        if let Some(name) = &self.probe_name {
            for pid in find_orphans(name) {
                if kill_process(pid.as_u32()) {
                    report.orphans_swept += 1;
                }
            }
        }

        if let Some(dir) = &self.state_dir {
            report.files_removed = remove_state_files(dir);
        }

        let remaining = self
            .probe_name
            .as_ref()
            .map_or(0, |name| find_orphans(name).len());
        report.clean = remaining == 0 && self.registry.is_empty();

        if report.clean {
            info!("shutdown complete: {report:?}");
        } else {
            warn!("shutdown left {remaining} probe processes behind: {report:?}");
        }

        report
    }
}

fn kill_process(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match sys.process(pid) {
        Some(process) => process.kill_with(Signal::Term).unwrap_or_else(|| process.kill()),
        None => false,
    }
}

/// Live children of this process whose name matches the probe program
fn find_orphans(program: &OsString) -> Vec<Pid> {
    let Ok(me) = sysinfo::get_current_pid() else {
        return Vec::new();
    };

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    sys.processes()
        .values()
        .filter(|process| process.parent() == Some(me))
        .filter(|process| process.status() != ProcessStatus::Zombie)
        .filter(|process| process.name() == program.as_os_str())
        .map(|process| process.pid())
        .collect()
}

fn remove_state_files(dir: &Path) -> usize {
    let mut removed = 0;

    let pid_file = dir.join(PID_FILE);
    if pid_file.exists() {
        match std::fs::remove_file(&pid_file) {
            Ok(()) => removed += 1,
            Err(e) => warn!("failed to remove {}: {e}", pid_file.display()),
        }
    }

    for dir in [dir.to_path_buf(), dir.join(QUEUE_DIR)] {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };

        for path in entries.flatten().map(|entry| entry.path()) {
            if path.extension().is_some_and(|ext| ext == "tmp") {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("failed to remove {}: {e}", path.display()),
                }
            }
        }
    }

    removed
}
