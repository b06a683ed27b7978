//! # scrapegate
//!
//! A loopback fetch daemon for metadata scrapers.
//!
//! Scrapers that run inside a media center talk to upstream catalogue APIs
//! which are often slow, blocked, or poisoned at the DNS level. `scrapegate`
//! runs next to them as a small local service: callers hand it batches of GET
//! requests as JSON over a loopback TCP socket and get back one result per
//! request, in order.
//!
//! ## Features
//!
//! - **Resolution chain**: hosts files, reachability-probed custom IPs, a
//!   positive cache, then a list of DNS-over-HTTPS providers
//! - **Pooled sessions**: one keep-alive connection pool per upstream origin
//! - **Worker pool**: created on the first batch, evicted when idle
//! - **Pinyin initials**: permutation of initial letters for Han text
//! - **Self-termination**: the daemon exits after a quiet period and removes
//!   its port file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scrapegate::client::DaemonClient;
//! use scrapegate::http::FetchSpec;
//!
//! #[tokio::main]
//! async fn main() -> scrapegate::error::Result<()> {
//!     let client = DaemonClient::new("/tmp/scrapegate/daemon.port");
//!     let items = client
//!         .fetch_batch(&[FetchSpec::new("https://api.tmdb.org/3/movie/550")], None)
//!         .await?;
//!     println!("{}", items[0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Network error codes and context helpers
//! - [`client`] - Caller-side helper that finds, launches and talks to the daemon
//! - [`config`] - TOML configuration
//! - [`daemon`] - Acceptor loop, request dispatch, worker pool, port file
//! - [`dns`] - Hosts files, DoH providers and the override chain
//! - [`http`] - Fetch specs, per-origin sessions and the session pool
//! - [`pinyin`] - Character table and initial-letter permutations
//! - [`protocol`] - Request document shapes and replies
//! - [`socket`] - TCP/TLS connect jobs and reachability probes

pub mod base;
pub mod client;
pub mod config;
pub mod daemon;
pub mod dns;
pub mod error;
pub mod http;
pub mod pinyin;
pub mod protocol;
pub mod socket;

pub use client::{DaemonClient, LaunchCommand};
pub use config::DaemonConfig;
pub use daemon::{Daemon, DaemonHandle};
pub use error::{DaemonError, Result};
pub use http::{FetchResult, FetchSpec};
