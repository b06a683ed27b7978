//! Session table: one pooled [`Session`] per upstream origin.

use crate::base::context::with_deadline;
use crate::base::neterror::NetError;
use crate::dns::Resolve;
use crate::http::fetch::{Fetch, FetchResult, FetchSpec, Fetching};
use crate::http::response::HttpResponse;
use crate::http::session::Session;
use crate::socket::{Origin, TlsConfig};
use dashmap::DashMap;
use http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Tuning for a [`SessionPool`].
#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    /// Concurrent connections allowed per origin.
    pub max_connections_per_host: usize,
    pub max_redirects: usize,
    /// Overall deadline for one fetch, redirects included.
    pub request_timeout: Duration,
    pub tls: TlsConfig,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 10,
            max_redirects: 10,
            request_timeout: Duration::from_secs(30),
            tls: TlsConfig::verified(),
        }
    }
}

/// Lazily populated origin → session table.
///
/// Sessions live for the lifetime of the pool. All of them resolve through
/// the same [`Resolve`] capability, which is how target domains get routed
/// through the override chain.
pub struct SessionPool {
    sessions: DashMap<Origin, Arc<Session>>,
    resolver: Arc<dyn Resolve>,
    config: SessionPoolConfig,
}

impl SessionPool {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self::with_config(resolver, SessionPoolConfig::default())
    }

    pub fn with_config(resolver: Arc<dyn Resolve>, config: SessionPoolConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &SessionPoolConfig {
        &self.config
    }

    /// Returns the session for the URL's origin, creating it on first use.
    pub fn session_for(&self, url: &Url) -> Result<Arc<Session>, NetError> {
        let origin = Origin::from_url(url).ok_or(NetError::UnknownUrlScheme)?;
        let session = self
            .sessions
            .entry(origin.clone())
            .or_insert_with(|| {
                tracing::debug!(origin = %origin, "creating session");
                Arc::new(Session::new(
                    origin,
                    self.resolver.clone(),
                    self.config.tls.clone(),
                    self.config.max_connections_per_host,
                ))
            })
            .clone();
        Ok(session)
    }

    /// Number of origins with a session.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// GET `url`, following redirects. No deadline and no status check.
    pub async fn get(&self, url: Url, headers: &HeaderMap) -> Result<HttpResponse, NetError> {
        let mut url = url;
        let mut hops = 0;
        loop {
            let session = self.session_for(&url)?;
            let resp = session.get(&url, headers).await?;

            let Some(location) = resp.redirect_location() else {
                return Ok(resp);
            };
            if hops >= self.config.max_redirects {
                return Err(NetError::TooManyRedirects);
            }
            let next = url.join(location).map_err(|_| NetError::InvalidUrl)?;
            tracing::debug!(from = %url, to = %next, status = resp.status().as_u16(), "following redirect");
            url = next;
            hops += 1;
        }
    }

    /// Runs one fetch spec to completion. Never fails; see [`FetchResult`].
    pub async fn execute(&self, spec: &FetchSpec) -> FetchResult {
        if spec.target().is_none() {
            return FetchResult::no_url();
        }
        let url = match spec.build_url() {
            Ok(url) => url,
            Err(e) => {
                return FetchResult::error(format!(
                    "{}: {}",
                    e,
                    spec.target().unwrap_or_default()
                ))
            }
        };

        let headers = spec.header_map();
        let request = async {
            let resp = self.get(url.clone(), &headers).await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(NetError::HttpStatus {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                    url: resp.url().to_string(),
                });
            }
            Ok::<_, NetError>(resp)
        };

        match with_deadline(self.config.request_timeout, request).await {
            Ok(resp) => FetchResult::Success {
                status: resp.status().as_u16(),
                text: resp.text(),
                json: resp.json().unwrap_or(Value::Null),
            },
            Err(e) => {
                tracing::warn!(url = %url, code = e.as_i32(), error = %e, "fetch failed");
                FetchResult::from(e)
            }
        }
    }
}

impl Fetch for SessionPool {
    fn fetch(&self, spec: FetchSpec) -> Fetching<'_> {
        Box::pin(async move { self.execute(&spec).await })
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GaiResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal keep-alive HTTP/1.1 server. `respond` maps a request line to a
    /// full response. Returns the port and a counter of accepted connections.
    async fn serve(respond: fn(&str) -> String) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            let head = String::from_utf8_lossy(&buf[..end]).to_string();
                            buf.drain(..end + 4);
                            let line = head.lines().next().unwrap_or_default().to_string();
                            if sock.write_all(respond(&line).as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (port, accepted)
    }

    fn reply(status: &str, extra: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}\r\n{}",
            status,
            body.len(),
            extra,
            body
        )
    }

    fn pool() -> SessionPool {
        SessionPool::new(Arc::new(GaiResolver::new()))
    }

    #[tokio::test]
    async fn test_fetch_success_and_connection_reuse() {
        let (port, accepted) = serve(|_| reply("200 OK", "", r#"{"id":550}"#)).await;
        let pool = pool();
        let spec = FetchSpec::new(format!("http://127.0.0.1:{}/3/movie/550", port));

        for _ in 0..3 {
            let result = pool.execute(&spec).await;
            assert_eq!(
                result,
                FetchResult::Success {
                    status: 200,
                    text: r#"{"id":550}"#.into(),
                    json: serde_json::json!({"id": 550}),
                }
            );
        }
        assert_eq!(pool.len(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_json_body_yields_null() {
        let (port, _) = serve(|_| reply("200 OK", "", "plain")).await;
        let result = pool()
            .execute(&FetchSpec::new(format!("http://127.0.0.1:{}/", port)))
            .await;
        assert_eq!(
            result,
            FetchResult::Success {
                status: 200,
                text: "plain".into(),
                json: Value::Null
            }
        );
    }

    #[tokio::test]
    async fn test_error_status_is_data() {
        let (port, _) = serve(|_| reply("404 Not Found", "", "{}")).await;
        let url = format!("http://127.0.0.1:{}/3/movie/0", port);
        let result = pool().execute(&FetchSpec::new(url.clone())).await;
        assert_eq!(
            result,
            FetchResult::error(format!("404 Not Found for url: {}", url))
        );
    }

    #[tokio::test]
    async fn test_relative_redirect_followed() {
        let (port, _) = serve(|line| {
            if line.starts_with("GET /old ") {
                reply("301 Moved Permanently", "Location: /new?x=1\r\n", "")
            } else {
                reply("200 OK", "", line)
            }
        })
        .await;
        let result = pool()
            .execute(&FetchSpec::new(format!("http://127.0.0.1:{}/old", port)))
            .await;
        assert_eq!(result.status(), Some(200));
        let FetchResult::Success { text, .. } = result else { panic!("expected success") };
        assert_eq!(text, "GET /new?x=1 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let (port, _) = serve(|_| reply("302 Found", "Location: /loop\r\n", "")).await;
        let result = pool()
            .execute(&FetchSpec::new(format!("http://127.0.0.1:{}/loop", port)))
            .await;
        assert_eq!(result, FetchResult::error("Too many redirects"));
    }

    #[tokio::test]
    async fn test_missing_url_does_no_work() {
        let pool = pool();
        assert_eq!(pool.execute(&FetchSpec::default()).await, FetchResult::no_url());
        assert_eq!(pool.execute(&FetchSpec::new("")).await, FetchResult::no_url());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_is_data() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = pool()
            .execute(&FetchSpec::new(format!("http://127.0.0.1:{}/", port)))
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and never answer
            let held = listener.accept().await;
            std::future::pending::<()>().await;
            drop(held);
        });

        let config = SessionPoolConfig {
            request_timeout: Duration::from_millis(500),
            ..SessionPoolConfig::default()
        };
        let pool = SessionPool::with_config(Arc::new(GaiResolver::new()), config);
        let result = pool
            .execute(&FetchSpec::new(format!("http://127.0.0.1:{}/", port)))
            .await;
        assert_eq!(result, FetchResult::error("Request timed out after 500 ms"));
    }
}
