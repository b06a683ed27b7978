//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dns::{system_hosts_path, DohProvider, TargetDomains};
use crate::error::{DaemonError, Result};
use crate::http::SessionPoolConfig;

/// Preferred loopback port.
pub const DEFAULT_PORT: u16 = 56789;

/// Daemon configuration, loaded from TOML.
///
/// Every field has a default, so an empty file is a valid configuration.
/// Durations are given in milliseconds.
///
/// # Example Configuration
///
/// ```toml
/// port = 56789
/// data_dir = "/var/lib/scrapegate"
/// idle_timeout_ms = 20000
/// worker_count = 5
///
/// # Hosts of the scraper's API base URLs are intercepted too
/// api_base_urls = ["https://api.tmdb.org/3", "webservice.fanart.tv/v3"]
///
/// [custom_ips]
/// "api.tmdb.org" = "13.224.161.90"
///
/// [[doh_providers]]
/// url = "https://1.1.1.1/dns-query"
/// accept = "application/dns-json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Loopback address to listen on
    pub host: IpAddr,

    /// Preferred port; an ephemeral port is used if it is taken
    pub port: u16,

    /// Directory holding the port file and the private hosts file
    pub data_dir: PathBuf,

    /// Operating system hosts file
    pub system_hosts_path: Option<PathBuf>,

    /// JSON character table for initial-letter queries
    pub char_map_path: Option<PathBuf>,

    /// Quiet period after which the daemon exits
    pub idle_timeout_ms: u64,

    /// Accept loop wake-up interval
    pub poll_interval_ms: u64,

    /// Fetch workers in the shared pool
    pub worker_count: usize,

    /// Quiet period after which the worker pool is torn down
    pub worker_idle_timeout_ms: u64,

    /// Overall deadline for one fetch
    pub fetch_timeout_ms: u64,

    /// Deadline for a custom IP reachability check
    pub probe_timeout_ms: u64,

    /// Deadline for each DoH provider
    pub doh_timeout_ms: u64,

    pub max_connections_per_host: usize,

    pub max_redirects: usize,

    /// Intercepted domain suffixes
    pub target_domains: Vec<String>,

    /// API base URLs whose hosts are intercepted as well
    pub api_base_urls: Vec<String>,

    /// Operator-supplied host → IP overrides
    pub custom_ips: BTreeMap<String, String>,

    pub doh_providers: Vec<DohProvider>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            data_dir: std::env::temp_dir().join("scrapegate"),
            system_hosts_path: Some(system_hosts_path()),
            char_map_path: None,
            idle_timeout_ms: 20_000,
            poll_interval_ms: 1_000,
            worker_count: 5,
            worker_idle_timeout_ms: 20_000,
            fetch_timeout_ms: 30_000,
            probe_timeout_ms: 2_000,
            doh_timeout_ms: 2_000,
            max_connections_per_host: 10,
            max_redirects: 10,
            target_domains: crate::dns::DEFAULT_TARGET_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            api_base_urls: vec![
                "https://api.tmdb.org/3".to_string(),
                "https://webservice.fanart.tv/v3".to_string(),
                "https://trakt.tv".to_string(),
                "https://www.imdb.com".to_string(),
            ],
            custom_ips: BTreeMap::new(),
            doh_providers: DohProvider::defaults(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.host.is_loopback() {
            return Err(DaemonError::Config(format!(
                "host {} is not a loopback address",
                self.host
            )));
        }
        if self.worker_count == 0 {
            return Err(DaemonError::Config("worker_count must be at least 1".into()));
        }
        if self.max_connections_per_host == 0 {
            return Err(DaemonError::Config(
                "max_connections_per_host must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(DaemonError::Config("poll_interval_ms must be positive".into()));
        }
        if self.doh_providers.is_empty() {
            return Err(DaemonError::Config("at least one DoH provider is required".into()));
        }
        for provider in &self.doh_providers {
            url::Url::parse(&provider.url).map_err(|e| {
                DaemonError::Config(format!("invalid DoH provider {}: {}", provider.url, e))
            })?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn port_file(&self) -> PathBuf {
        self.data_dir.join("daemon.port")
    }

    /// Hosts files in load order: the system file, then the private one.
    pub fn hosts_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(2);
        if let Some(path) = &self.system_hosts_path {
            files.push(path.clone());
        }
        files.push(self.data_dir.join("hosts"));
        files
    }

    pub fn char_map_file(&self) -> PathBuf {
        self.char_map_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("char_map.json"))
    }

    /// Configured suffixes plus the hosts of the API base URLs.
    pub fn targets(&self) -> TargetDomains {
        let mut targets = TargetDomains::new(&self.target_domains);
        targets.extend_from_base_urls(&self.api_base_urls);
        targets
    }

    pub fn session_pool_config(&self) -> SessionPoolConfig {
        SessionPoolConfig {
            max_connections_per_host: self.max_connections_per_host,
            max_redirects: self.max_redirects,
            request_timeout: self.fetch_timeout(),
            ..SessionPoolConfig::default()
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn doh_timeout(&self) -> Duration {
        Duration::from_millis(self.doh_timeout_ms)
    }
}
