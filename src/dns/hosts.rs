//! Static hosts-file entries.
//!
//! Entries come from the operating system's hosts file and then from the
//! daemon's private hosts file; a name listed in both takes the private
//! file's address. Hosts entries are operator-controlled and are trusted
//! without a reachability check.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use super::gai::parse_ip_literal;

/// Immutable hostname → address table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsMap {
    entries: HashMap<String, IpAddr>,
}

impl HostsMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file in `paths` in order, later files overriding earlier ones.
    ///
    /// Missing or unreadable files are logged and skipped.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut map = Self::new();
        for path in paths {
            let path = path.as_ref();
            match std::fs::read(path) {
                Ok(bytes) => {
                    let before = map.len();
                    map.extend_from_str(&String::from_utf8_lossy(&bytes));
                    tracing::info!(
                        path = %path.display(),
                        entries = map.len() - before,
                        "loaded hosts file"
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "hosts file not present");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read hosts file");
                }
            }
        }
        map
    }

    /// Parses hosts-file text into a new map.
    pub fn parse(content: &str) -> Self {
        let mut map = Self::new();
        map.extend_from_str(content);
        map
    }

    fn extend_from_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Trailing comments are allowed after the last hostname
            let line = line.split('#').next().unwrap_or_default();
            let mut parts = line.split_whitespace();
            let Some(ip) = parts.next().and_then(parse_ip_literal) else {
                continue;
            };
            for host in parts {
                self.entries.insert(host.to_ascii_lowercase(), ip);
            }
        }
    }

    /// Exact-match lookup.
    pub fn get(&self, host: &str) -> Option<IpAddr> {
        self.entries.get(host).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Location of the operating system's hosts file.
pub fn system_hosts_path() -> PathBuf {
    if cfg!(windows) {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());
        PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}
