//! Host connectivity checks
//!
//! The detector runs a cascade of independent checks and stops at the first success:
//! DNS resolution, HTTPS reachability and finally a single ICMP probe. Only when every
//! check fails is the host considered offline.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::ConnectivityConfig;
use crate::probe::ProbeFlavor;

#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<()>;
}

/// Succeeds if any of the domains resolves
pub struct DnsCheck {
    domains: Vec<String>,
    timeout: Duration,
}

impl DnsCheck {
    pub fn new(domains: Vec<String>, timeout: Duration) -> Self {
        Self { domains, timeout }
    }
}

#[async_trait]
impl ConnectivityCheck for DnsCheck {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn check(&self) -> Result<()> {
        for domain in &self.domains {
            let lookup = tokio::net::lookup_host(format!("{domain}:443"));
            match timeout(self.timeout, lookup).await {
                Ok(Ok(mut addrs)) => {
                    if addrs.next().is_some() {
                        trace!("resolved {domain}");
                        return Ok(());
                    }
                    trace!("{domain} resolved to nothing");
                }
                Ok(Err(e)) => trace!("failed to resolve {domain}: {e}"),
                Err(_) => trace!("resolving {domain} timed out"),
            }
        }
        bail!("none of {:?} resolved", self.domains)
    }
}

/// Succeeds if any of the hosts answers an HTTPS request, whatever the status
pub struct HttpsCheck {
    hosts: Vec<String>,
    client: Client,
}

impl HttpsCheck {
    pub fn new(hosts: Vec<String>, timeout: Duration) -> Self {
        Self {
            hosts,
            client: crate::notify::http_client(timeout),
        }
    }
}

#[async_trait]
impl ConnectivityCheck for HttpsCheck {
    fn name(&self) -> &'static str {
        "https"
    }

    async fn check(&self) -> Result<()> {
        for host in &self.hosts {
            match self.client.head(format!("https://{host}")).send().await {
                Ok(response) => {
                    trace!("{host} answered with {}", response.status());
                    return Ok(());
                }
                Err(e) => trace!("{host} unreachable: {e}"),
            }
        }
        bail!("none of {:?} answered", self.hosts)
    }
}

/// Succeeds if any of the servers answers a single echo request
pub struct IcmpCheck {
    program: PathBuf,
    servers: Vec<String>,
    timeout: Duration,
}

impl IcmpCheck {
    pub fn new(program: impl Into<PathBuf>, servers: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            servers,
            timeout,
        }
    }

    async fn probe(&self, server: &str) -> Result<bool> {
        let flavor = ProbeFlavor::detect(&self.program);
        let args = flavor.single_args(server, self.timeout.as_secs().max(1));

        let mut child = Command::new(&self.program)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        // the probe has its own timeout, this only guards against a hung process
        match timeout(self.timeout + Duration::from_secs(1), child.wait()).await {
            Ok(status) => Ok(status?.success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl ConnectivityCheck for IcmpCheck {
    fn name(&self) -> &'static str {
        "icmp"
    }

    async fn check(&self) -> Result<()> {
        for server in &self.servers {
            match self.probe(server).await {
                Ok(true) => return Ok(()),
                Ok(false) => trace!("{server} did not answer"),
                Err(e) => trace!("icmp probe to {server} failed: {e:#}"),
            }
        }
        bail!("none of {:?} answered", self.servers)
    }
}

pub fn default_cascade(
    config: &ConnectivityConfig,
    program: impl Into<PathBuf>,
) -> Vec<Box<dyn ConnectivityCheck>> {
    let timeout = Duration::from_secs(config.timeout.max(1));

    vec![
        Box::new(DnsCheck::new(config.dns_domains.clone(), timeout)),
        Box::new(HttpsCheck::new(config.https_hosts.clone(), timeout)),
        Box::new(IcmpCheck::new(program, config.icmp_servers.clone(), timeout)),
    ]
}

/// Run the checks in order; `true` as soon as one succeeds
pub async fn run_cascade(checks: &[Box<dyn ConnectivityCheck>]) -> bool {
    for check in checks {
        match check.check().await {
            Ok(()) => {
                trace!("connectivity check {} succeeded", check.name());
                return true;
            }
            Err(e) => debug!("connectivity check {} failed: {e:#}", check.name()),
        }
    }
    false
}
