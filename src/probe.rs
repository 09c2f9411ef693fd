//! ICMP probe subprocess handling and output parsing
//!
//! Supported output formats:
//!
//! ```text
//! iputils ping -O -n:
//!   64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.3 ms
//!   no answer yet for icmp_seq=2
//!   From 192.168.1.1 icmp_seq=3 Destination Host Unreachable
//!   ping: sendmsg: Network is unreachable
//!
//! fping -l -e:
//!   1.1.1.1 : [0], 64 bytes, 12.3 ms (12.3 avg, 0% loss)
//!   1.1.1.1 : [1], timed out (12.3 avg, 50% loss)
//! ```
//!
//! Anything else (headers, statistics) is ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::TargetConfig;

static RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:time[=<]\s*([\d.]+)\s*ms|bytes,\s*([\d.]+)\s*ms)").expect("valid regex")
});

static TTL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bttl[= ](\d+)").expect("valid regex"));

static ROLLING_AVG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*avg").expect("valid regex"));

static FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(timeout|timed out|no answer yet|unreachable|no route|network is down|sendmsg|sendto|time to live exceeded|packet filtered)",
    )
    .expect("valid regex")
});

/// Canonical reason for a lost probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    HostUnreachable,
    NoRoute,
    NetworkDown,
    Unknown,
}

impl FailureReason {
    /// Best-effort classification; never fails
    pub fn classify(line: &str) -> Self {
        let line = line.to_ascii_lowercase();

        if line.contains("no route") {
            FailureReason::NoRoute
        } else if line.contains("network is down")
            || line.contains("network down")
            || line.contains("network is unreachable")
            || line.contains("network unreachable")
        {
            FailureReason::NetworkDown
        } else if line.contains("unreachable") {
            FailureReason::HostUnreachable
        } else if line.contains("timeout") || line.contains("timed out") || line.contains("no answer")
        {
            FailureReason::Timeout
        } else {
            FailureReason::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "Timeout",
            FailureReason::HostUnreachable => "Host unreachable",
            FailureReason::NoRoute => "No route to host",
            FailureReason::NetworkDown => "Network down",
            FailureReason::Unknown => "Unknown reason",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single line of probe output
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeLine {
    Reply {
        rtt: f64,
        ttl: Option<u32>,
        rolling_avg: Option<f64>,
    },
    Failure(FailureReason),
    Other,
}

impl ProbeLine {
    pub fn parse(line: &str) -> Self {
        if let Some(rtt) = RTT
            .captures(line)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            let ttl = TTL
                .captures(line)
                .and_then(|caps| caps[1].parse::<u32>().ok());
            let rolling_avg = ROLLING_AVG
                .captures(line)
                .and_then(|caps| caps[1].parse::<f64>().ok());
            return ProbeLine::Reply {
                rtt,
                ttl,
                rolling_avg,
            };
        }

        if FAILURE.is_match(line) {
            return ProbeLine::Failure(FailureReason::classify(line));
        }

        ProbeLine::Other
    }
}

/// Output conventions of the supported probe programs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFlavor {
    Ping,
    Fping,
}

impl ProbeFlavor {
    pub fn detect(program: &Path) -> Self {
        let is_fping = program
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains("fping"));

        if is_fping {
            ProbeFlavor::Fping
        } else {
            ProbeFlavor::Ping
        }
    }

    /// Arguments for a continuous probe of `address`
    pub fn continuous_args(&self, address: &str, interval: f64) -> Vec<String> {
        match self {
            ProbeFlavor::Ping => vec![
                "-O".to_string(),
                "-n".to_string(),
                "-i".to_string(),
                format!("{interval}"),
                address.to_string(),
            ],
            ProbeFlavor::Fping => vec![
                "-l".to_string(),
                "-e".to_string(),
                "-p".to_string(),
                format!("{}", (interval * 1000.0).round() as u64),
                address.to_string(),
            ],
        }
    }

    /// Arguments for a single probe of `address`
    pub fn single_args(&self, address: &str, timeout_secs: u64) -> Vec<String> {
        match self {
            ProbeFlavor::Ping => vec![
                "-n".to_string(),
                "-c".to_string(),
                "1".to_string(),
                "-W".to_string(),
                timeout_secs.to_string(),
                address.to_string(),
            ],
            ProbeFlavor::Fping => vec![
                "-c".to_string(),
                "1".to_string(),
                "-t".to_string(),
                (timeout_secs * 1000).to_string(),
                address.to_string(),
            ],
        }
    }
}

/// A running stream of probe output lines
#[async_trait]
pub trait LineSource: Send {
    /// Next output line; `None` once the probe has exited
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;

    /// OS process id, if the source is a subprocess
    fn pid(&self) -> Option<u32>;

    /// Stop producing lines and release the underlying process
    async fn terminate(&mut self);
}

/// Creates line sources for a target (initially and on respawn)
pub trait ProbeSpawner: Send + Sync {
    fn spawn(&self, target: &TargetConfig) -> Result<Box<dyn LineSource>>;

    /// Program name used to recognise orphaned probes
    fn program(&self) -> &Path;
}

/// Spawns the real ICMP probe program
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    flavor: ProbeFlavor,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let flavor = ProbeFlavor::detect(&program);
        Self { program, flavor }
    }
}

impl ProbeSpawner for CommandSpawner {
    fn spawn(&self, target: &TargetConfig) -> Result<Box<dyn LineSource>> {
        let args = self.flavor.continuous_args(&target.address, target.interval);
        trace!("spawning {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("probe stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("probe stderr was not captured")?;

        debug!(
            "probe for {} started with pid {:?}",
            target.address,
            child.id()
        );

        Ok(Box::new(ProbeProcess {
            pid: child.id(),
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr: Some(BufReader::new(stderr).lines()),
        }))
    }

    fn program(&self) -> &Path {
        &self.program
    }
}

/// A probe subprocess with both output pipes attached
pub struct ProbeProcess {
    child: Child,
    pid: Option<u32>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Option<Lines<BufReader<ChildStderr>>>,
}

#[async_trait]
impl LineSource for ProbeProcess {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let Some(stderr) = self.stderr.as_mut() else {
                return self.stdout.next_line().await;
            };

            tokio::select! {
                line = self.stdout.next_line() => return line,
                line = stderr.next_line() => match line? {
                    Some(line) => return Ok(Some(line)),
                    None => self.stderr = None,
                },
            }
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("failed to kill probe {:?}: {e}", self.pid);
        }
    }
}

/// Line source fed from a channel, for replaying recorded probe output
pub struct ChannelSource {
    lines: mpsc::Receiver<String>,
}

impl ChannelSource {
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl LineSource for ChannelSource {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.lines.recv().await)
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) {
        self.lines.close();
    }
}
