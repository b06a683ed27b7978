//! System DNS resolver using getaddrinfo.
//!
//! This resolver uses the operating system's native DNS resolution via
//! `getaddrinfo`, executed in a thread pool to avoid blocking the async runtime.
//!
//! # When to Use
//!
//! - For every hostname outside the intercepted target domains
//! - As the fallback when the override chain cannot resolve a target domain
//! - For the DoH providers themselves (they are IP literals and never recurse)

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// System DNS resolver using `getaddrinfo` in a thread pool.
///
/// This resolver wraps the standard library's `ToSocketAddrs` trait and
/// executes resolution in `tokio::task::spawn_blocking` to avoid blocking
/// the async runtime.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            if let Some(ip) = parse_ip_literal(name.as_str()) {
                return Ok(Box::new(std::iter::once(SocketAddr::new(ip, 0))) as Addrs);
            }

            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>())
            })
            .await;

            // Handle task join error (cancellation, panic)
            let addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::NameNotResolved
                })?
                .dns_context(&domain)
                .map_err(|e| {
                    tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
                    e
                })?;

            if addrs.is_empty() {
                return Err(NetError::NameNotResolvedFor {
                    domain,
                    reason: "No addresses returned by getaddrinfo".into(),
                });
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Parses `host` as an IPv4 or IPv6 literal.
///
/// Bracketed IPv6 hosts as they appear in URLs (`[::1]`) are accepted.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse::<IpAddr>().ok()
}
