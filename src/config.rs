use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub targets: Vec<TargetConfig>,

    /// Host connectivity detection (defaults apply when omitted)
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Alert dispatching (defaults to log-only delivery)
    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Directory for the alert queue and shared state files
    #[serde(default = "crate::util::get_state_dir")]
    pub state_dir: PathBuf,
}

/// A single monitored endpoint
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TargetConfig {
    pub address: String,
    pub display: Option<String>,
    /// Seconds between two probes (fractions allowed)
    #[serde(default = "default_probe_interval")]
    pub interval: f64,
    /// Consecutive lost probes before the target is considered down
    #[serde(default = "default_consecutive_loss_threshold")]
    pub consecutive_loss_threshold: u32,
    /// Loss percentage per report window that raises a loss alert
    #[serde(default = "default_loss_threshold_pct")]
    pub loss_threshold_pct: f64,
    /// Seconds between two status reports
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
}

impl TargetConfig {
    pub fn new(address: impl ToString) -> Self {
        Self {
            address: address.to_string(),
            display: None,
            interval: default_probe_interval(),
            consecutive_loss_threshold: default_consecutive_loss_threshold(),
            loss_threshold_pct: default_loss_threshold_pct(),
            report_interval: default_report_interval(),
        }
    }

    pub fn name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.address)
    }

    pub fn report_duration(&self) -> Duration {
        Duration::from_secs(self.report_interval.max(1))
    }
}

fn default_probe_interval() -> f64 {
    1.0
}

fn default_consecutive_loss_threshold() -> u32 {
    3
}

fn default_loss_threshold_pct() -> f64 {
    10.0
}

fn default_report_interval() -> u64 {
    60
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Seconds alerts stay suppressed after connectivity comes back
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    /// Per-check timeout in seconds
    #[serde(default = "default_check_timeout")]
    pub timeout: u64,
    /// Forced checks within this many seconds of the last one reuse its result
    #[serde(default = "default_recheck_debounce")]
    pub recheck_debounce: u64,
    #[serde(default = "default_dns_domains")]
    pub dns_domains: Vec<String>,
    #[serde(default = "default_https_hosts")]
    pub https_hosts: Vec<String>,
    #[serde(default = "default_icmp_servers")]
    pub icmp_servers: Vec<String>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            grace_period: default_grace_period(),
            timeout: default_check_timeout(),
            recheck_debounce: default_recheck_debounce(),
            dns_domains: default_dns_domains(),
            https_hosts: default_https_hosts(),
            icmp_servers: default_icmp_servers(),
        }
    }
}

fn default_check_interval() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    3
}

fn default_recheck_debounce() -> u64 {
    2
}

fn default_dns_domains() -> Vec<String> {
    vec!["google.com".to_string(), "cloudflare.com".to_string()]
}

fn default_https_hosts() -> Vec<String> {
    vec!["www.google.com".to_string(), "1.1.1.1".to_string()]
}

fn default_icmp_servers() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string(), "9.9.9.9".to_string()]
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertsConfig {
    /// Minimum seconds between two alerts of the same kind for one target (0 = off)
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,
    /// Hours a queued alert is kept before it is dropped undelivered
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_expire_interval_secs")]
    pub expire_interval_secs: u64,
    /// Attempts per delivery on transport failures
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_send_timeout")]
    pub timeout: u64,
    pub channel: Option<Alert>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            throttle_secs: default_throttle_secs(),
            retention_hours: default_retention_hours(),
            expire_interval_secs: default_expire_interval_secs(),
            retries: default_retries(),
            timeout: default_send_timeout(),
            channel: None,
        }
    }
}

fn default_throttle_secs() -> u64 {
    300
}

fn default_retention_hours() -> u64 {
    24
}

fn default_expire_interval_secs() -> u64 {
    30 * 60
}

fn default_retries() -> u32 {
    3
}

fn default_send_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    /// ICMP probe program; must print one line per probe
    #[serde(default = "default_probe_program")]
    pub program: String,
    /// Upper bound for the respawn backoff in seconds
    #[serde(default = "default_max_respawn_backoff")]
    pub max_respawn_backoff: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: default_probe_program(),
            max_respawn_backoff: default_max_respawn_backoff(),
        }
    }
}

impl ProbeConfig {
    /// Absolute path of the probe program, looked up on `PATH` unless given as a path
    pub fn resolve_program(&self) -> anyhow::Result<PathBuf> {
        which::which(&self.program)
            .with_context(|| format!("probe program {} not found", self.program))
    }
}

fn default_probe_program() -> String {
    "ping".to_string()
}

fn default_max_respawn_backoff() -> u64 {
    60
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str::<Config>(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .and_then(|config| {
            if config.targets.is_empty() {
                anyhow::bail!("configuration contains no targets");
            }
            Ok(config)
        })
        .inspect(|config| trace!("loaded config: {config:?}"))
}
