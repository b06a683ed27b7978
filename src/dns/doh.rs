//! DNS-over-HTTPS lookups against a fixed provider list.
//!
//! Providers are queried in order with `?name=<host>&type=A`, each under its
//! own deadline. The first provider whose JSON answer carries an A record
//! wins; every failure (transport, status, body shape) moves on to the next.

use super::gai::GaiResolver;
use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::with_deadline;
use crate::base::neterror::NetError;
use crate::http::{SessionPool, SessionPoolConfig};
use http::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default per-provider deadline.
pub const DEFAULT_DOH_TIMEOUT: Duration = Duration::from_secs(2);

/// One DoH endpoint and the media type it answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DohProvider {
    pub url: String,
    pub accept: String,
}

impl DohProvider {
    pub fn new(url: impl Into<String>, accept: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            accept: accept.into(),
        }
    }

    /// Built-in providers, queried in this order.
    pub fn defaults() -> Vec<DohProvider> {
        vec![
            DohProvider::new("https://1.1.1.1/dns-query", "application/dns-json"),
            DohProvider::new("https://223.5.5.5/resolve", "application/json"),
            DohProvider::new("https://223.6.6.6/resolve", "application/json"),
        ]
    }

    fn query_url(&self, host: &str) -> Result<Url, NetError> {
        let mut url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        url.query_pairs_mut()
            .append_pair("name", host)
            .append_pair("type", "A");
        Ok(url)
    }
}

/// Extracts the first A record from a DoH JSON answer.
pub fn parse_answer(body: &Value) -> Option<Ipv4Addr> {
    body.get("Answer")?
        .as_array()?
        .iter()
        .filter(|record| record.get("type").and_then(Value::as_u64) == Some(1))
        .find_map(|record| record.get("data")?.as_str()?.trim().parse().ok())
}

/// Resolver backed by DoH providers.
///
/// Provider endpoints are IP literals, so the underlying sessions connect
/// through the system resolver without ever re-entering this one.
#[derive(Clone)]
pub struct DohResolver {
    providers: Arc<[DohProvider]>,
    timeout: Duration,
    sessions: Arc<SessionPool>,
}

impl Default for DohResolver {
    fn default() -> Self {
        Self::new(DohProvider::defaults(), DEFAULT_DOH_TIMEOUT)
    }
}

impl DohResolver {
    pub fn new(providers: Vec<DohProvider>, timeout: Duration) -> Self {
        let config = SessionPoolConfig {
            max_connections_per_host: 4,
            request_timeout: timeout,
            ..SessionPoolConfig::default()
        };
        Self {
            providers: providers.into(),
            timeout,
            sessions: Arc::new(SessionPool::with_config(Arc::new(GaiResolver::new()), config)),
        }
    }

    pub fn providers(&self) -> &[DohProvider] {
        &self.providers
    }

    /// Resolves `host` to an IPv4 address, trying each provider in turn.
    pub async fn lookup(&self, host: &str) -> Result<Ipv4Addr, NetError> {
        for provider in self.providers.iter() {
            match with_deadline(self.timeout, self.query(provider, host)).await {
                Ok(ip) => {
                    tracing::debug!(domain = %host, provider = %provider.url, ip = %ip, "DoH answer");
                    return Ok(ip);
                }
                Err(e) => {
                    tracing::warn!(domain = %host, provider = %provider.url, error = %e, "DoH provider failed");
                }
            }
        }
        Err(NetError::NameNotResolvedFor {
            domain: host.to_string(),
            reason: "no DoH provider answered".into(),
        })
    }

    async fn query(&self, provider: &DohProvider, host: &str) -> Result<Ipv4Addr, NetError> {
        let url = provider.query_url(host)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&provider.accept).map_err(|_| NetError::InvalidUrl)?,
        );

        let resp = self.sessions.get(url, &headers).await?;
        if !resp.status().is_success() {
            return Err(NetError::HttpStatus {
                status: resp.status().as_u16(),
                reason: resp.status().canonical_reason().unwrap_or("Unknown").to_string(),
                url: resp.url().to_string(),
            });
        }
        let body = resp.json().ok_or(NetError::InvalidResponse)?;
        parse_answer(&body).ok_or(NetError::EmptyResponse)
    }
}

impl Resolve for DohResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let ip = this.lookup(name.as_str()).await?;
            Ok(Box::new(std::iter::once(SocketAddr::new(IpAddr::V4(ip), 0))) as Addrs)
        })
    }
}

impl std::fmt::Debug for DohResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohResolver")
            .field("providers", &self.providers)
            .field("timeout", &self.timeout)
            .finish()
    }
}
