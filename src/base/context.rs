//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors and elapsed deadlines into context-rich `NetError`
//! variants.

use crate::base::neterror::NetError;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use scrapegate::base::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("api.tmdb.org", 443)?;
    /// // Error: "Connection to api.tmdb.org:443 failed: connection refused"
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }
}

/// Await `fut`, mapping an elapsed deadline to [`NetError::RequestTimedOut`].
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, NetError>
where
    F: Future<Output = Result<T, NetError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(NetError::RequestTimedOut(limit.as_millis() as u64)),
    }
}
