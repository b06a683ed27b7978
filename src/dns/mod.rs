//! DNS Resolution Module
//!
//! Provides pluggable DNS resolution with support for:
//! - System resolver (getaddrinfo via thread pool)
//! - DNS-over-HTTPS lookups against a fixed provider list
//! - Hosts files and operator-supplied overrides for target domains
//!
//! # Architecture
//!
//! The `Resolve` trait is the core abstraction. Outbound sessions hold an
//! `Arc<dyn Resolve>`; the daemon hands them an [`InterceptingResolver`] that
//! routes target domains through the [`HostResolver`] chain and everything
//! else to [`GaiResolver`].
//!
//! # Example
//!
//! ```rust,ignore
//! use scrapegate::dns::{Name, Resolve, DohResolver};
//!
//! let resolver = DohResolver::default();
//! let addrs = resolver.resolve(Name::new("api.tmdb.org")).await?;
//! for addr in addrs {
//!     println!("Resolved: {}", addr);
//! }
//! ```

mod doh;
mod gai;
mod hostresolver;
mod hosts;
mod resolve;

pub use doh::{parse_answer, DohProvider, DohResolver, DEFAULT_DOH_TIMEOUT};
pub use gai::{parse_ip_literal, GaiResolver};
pub use hostresolver::{HostResolver, InterceptingResolver, TargetDomains, DEFAULT_TARGET_DOMAINS};
pub use hosts::{system_hosts_path, HostsMap};
pub use resolve::{Addrs, Name, Resolve, Resolving};
