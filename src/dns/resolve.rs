//! Core DNS resolution types and traits.
//!
//! This module defines the `Resolve` trait and supporting types that form
//! the foundation of the DNS abstraction layer. Every outbound connection the
//! daemon makes looks its host up through an `Arc<dyn Resolve>`, so swapping
//! the resolver is how target domains get routed through the override chain.

use crate::base::neterror::NetError;
use std::{fmt, future::Future, net::SocketAddr, pin::Pin, sync::Arc};

/// A domain name to resolve into IP addresses.
///
/// Hostnames are compared case-insensitively by DNS, so the name is stored
/// lowercased with any trailing root dot removed.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl AsRef<str>) -> Self {
        let host = host.as_ref().trim_end_matches('.').to_ascii_lowercase();
        Self { host: host.into_boxed_str() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Alias for an `Iterator` trait object over `SocketAddr`.
pub type Addrs = Box<dyn Iterator<Item = SocketAddr> + Send>;

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, NetError>> + Send>>;

/// Trait for DNS resolution.
///
/// Implementations must be thread-safe; connection handlers and fetch workers
/// resolve concurrently through one shared instance.
///
/// # Design Notes
///
/// - Uses `&self` for concurrent resolution without mutable access.
/// - Returns boxed futures for trait object compatibility.
pub trait Resolve: Send + Sync {
    /// Resolves a domain name to IP addresses.
    ///
    /// The returned addresses will have port 0; callers should set the
    /// appropriate port based on the target service.
    fn resolve(&self, name: Name) -> Resolving;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: Name) -> Resolving {
        (**self).resolve(name)
    }
}

/// Wraps an already-known list of addresses as a ready [`Resolving`] future.
pub(crate) fn ready(addrs: Vec<SocketAddr>) -> Resolving {
    Box::pin(std::future::ready(Ok(Box::new(addrs.into_iter()) as Addrs)))
}
