//! The override chain for target domains.
//!
//! Lookup order, first hit wins:
//! 1. hosts-file entry (trusted as is)
//! 2. operator override, used only after a TLS reachability probe succeeds
//! 3. cached DoH answer
//! 4. live DoH lookup, cached on success
//!
//! Anything that is not a target domain, and any target the chain cannot
//! resolve, goes to the system resolver through [`InterceptingResolver`].

use super::gai::parse_ip_literal;
use super::hosts::HostsMap;
use super::{Addrs, Name, Resolve, Resolving};
use crate::socket::probe::{Probe, ProbeTarget, DEFAULT_PROBE_TIMEOUT};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use url::Url;

/// Domains intercepted out of the box.
pub const DEFAULT_TARGET_DOMAINS: [&str; 5] =
    ["themoviedb.org", "tmdb.org", "fanart.tv", "imdb.com", "trakt.tv"];

/// Suffix set deciding which hostnames go through the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDomains {
    suffixes: Vec<String>,
}

impl TargetDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        set.extend(domains);
        set
    }

    pub fn defaults() -> Self {
        Self::new(DEFAULT_TARGET_DOMAINS)
    }

    pub fn extend<I, S>(&mut self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for domain in domains {
            let domain = domain.as_ref().trim().trim_matches('.').to_ascii_lowercase();
            if !domain.is_empty() && !self.suffixes.contains(&domain) {
                self.suffixes.push(domain);
            }
        }
    }

    /// Adds the host of each API base URL. A scheme is optional.
    pub fn extend_from_base_urls<I, S>(&mut self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: Vec<String> = urls
            .into_iter()
            .filter_map(|url| base_url_host(url.as_ref()))
            .collect();
        self.extend(hosts);
    }

    /// True when `host` equals a listed domain or is a subdomain of one.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.suffixes.iter().any(|d| {
            host == *d
                || (host.len() > d.len()
                    && host.ends_with(d.as_str())
                    && host.as_bytes()[host.len() - d.len() - 1] == b'.')
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.suffixes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

fn base_url_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{}", raw))
    };
    parsed.ok()?.host_str().map(str::to_ascii_lowercase)
}

/// Owner of every map the chain consults.
pub struct HostResolver {
    hosts: RwLock<HostsMap>,
    overrides: RwLock<HashMap<String, IpAddr>>,
    cache: DashMap<String, Ipv4Addr>,
    targets: RwLock<TargetDomains>,
    prober: Arc<dyn Probe>,
    doh: Arc<dyn Resolve>,
    probe_timeout: Duration,
}

impl HostResolver {
    pub fn new(prober: Arc<dyn Probe>, doh: Arc<dyn Resolve>) -> Self {
        Self {
            hosts: RwLock::new(HostsMap::new()),
            overrides: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
            targets: RwLock::new(TargetDomains::defaults()),
            prober,
            doh,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_hosts(self, hosts: HostsMap) -> Self {
        self.replace_hosts(hosts);
        self
    }

    pub fn with_targets(self, targets: TargetDomains) -> Self {
        self.replace_targets(targets);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn is_target(&self, host: &str) -> bool {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matches(host)
    }

    /// Runs the chain for `host`. `None` means the caller should fall back to
    /// system resolution.
    pub async fn lookup(&self, host: &str) -> Option<IpAddr> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        let pinned = self.hosts.read().unwrap_or_else(PoisonError::into_inner).get(&host);
        if let Some(ip) = pinned {
            tracing::debug!(domain = %host, ip = %ip, "resolved from hosts file");
            return Some(ip);
        }

        if let Some(ip) = self.override_for(&host) {
            let target = ProbeTarget::new(ip)
                .with_host(host.clone())
                .with_timeout(self.probe_timeout);
            match self.prober.probe(target).await {
                Ok(()) => {
                    tracing::debug!(domain = %host, ip = %ip, "using custom IP");
                    return Some(ip);
                }
                Err(e) => {
                    tracing::warn!(domain = %host, ip = %ip, error = %e, "custom IP unreachable, falling through");
                }
            }
        }

        if let Some(ip) = self.cached(&host) {
            tracing::debug!(domain = %host, ip = %ip, "resolved from cache");
            return Some(IpAddr::V4(ip));
        }

        match self.doh.resolve(Name::new(&host)).await {
            Ok(mut addrs) => {
                let ip = addrs.next()?.ip();
                if let IpAddr::V4(v4) = ip {
                    self.cache.insert(host.clone(), v4);
                }
                tracing::debug!(domain = %host, ip = %ip, "resolved via DoH");
                Some(ip)
            }
            Err(e) => {
                tracing::warn!(domain = %host, error = %e, "DoH resolution failed");
                None
            }
        }
    }

    pub fn override_for(&self, host: &str) -> Option<IpAddr> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .copied()
    }

    /// Sets or clears one override. An empty value clears; a value that is
    /// not an IP address is rejected and leaves the map unchanged.
    pub fn set_override(&self, host: &str, value: &str) -> bool {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        let value = value.trim();
        let mut overrides = self.overrides.write().unwrap_or_else(PoisonError::into_inner);
        if value.is_empty() {
            let removed = overrides.remove(&host).is_some();
            if removed {
                tracing::info!(domain = %host, "custom IP removed");
            }
            return removed;
        }
        match parse_ip_literal(value) {
            Some(ip) => {
                tracing::info!(domain = %host, ip = %ip, "custom IP set");
                overrides.insert(host, ip) != Some(ip)
            }
            None => {
                tracing::warn!(domain = %host, value = %value, "ignoring custom IP that is not an address");
                false
            }
        }
    }

    /// Applies a `dns_settings` object. `null` clears like an empty string;
    /// other non-string values are ignored. Returns the number of changes.
    pub fn apply_dns_settings(&self, settings: &Map<String, Value>) -> usize {
        let mut changed = 0;
        for (host, value) in settings {
            let applied = match value {
                Value::String(s) => self.set_override(host, s),
                Value::Null => self.set_override(host, ""),
                other => {
                    tracing::warn!(domain = %host, value = %other, "ignoring non-string custom IP");
                    false
                }
            };
            if applied {
                changed += 1;
            }
        }
        changed
    }

    /// Replaces the whole override map, e.g. after a settings reload.
    pub fn reset_overrides<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for (host, ip) in entries {
            self.set_override(host.as_ref(), ip.as_ref());
        }
    }

    pub fn override_count(&self) -> usize {
        self.overrides.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn replace_hosts(&self, hosts: HostsMap) {
        *self.hosts.write().unwrap_or_else(PoisonError::into_inner) = hosts;
    }

    pub fn replace_targets(&self, targets: TargetDomains) {
        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
    }

    pub fn cached(&self, host: &str) -> Option<Ipv4Addr> {
        self.cache.get(host).map(|entry| *entry.value())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostResolver")
            .field("overrides", &self.override_count())
            .field("cache", &self.cache.len())
            .finish()
    }
}

/// [`Resolve`] front that sends target domains through a [`HostResolver`]
/// and everything else to `system`.
#[derive(Clone)]
pub struct InterceptingResolver {
    chain: Arc<HostResolver>,
    system: Arc<dyn Resolve>,
}

impl InterceptingResolver {
    pub fn new(chain: Arc<HostResolver>, system: Arc<dyn Resolve>) -> Self {
        Self { chain, system }
    }

    pub fn chain(&self) -> &Arc<HostResolver> {
        &self.chain
    }
}

impl Resolve for InterceptingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        if parse_ip_literal(name.as_str()).is_some() || !self.chain.is_target(name.as_str()) {
            return self.system.resolve(name);
        }

        let chain = self.chain.clone();
        let system = self.system.clone();
        Box::pin(async move {
            match chain.lookup(name.as_str()).await {
                Some(ip) => Ok(Box::new(std::iter::once(SocketAddr::new(ip, 0))) as Addrs),
                None => {
                    tracing::debug!(domain = %name, "chain unresolved, using system resolver");
                    system.resolve(name).await
                }
            }
        })
    }
}
