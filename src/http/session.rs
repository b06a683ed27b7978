//! Per-origin HTTP/1.1 session.
//!
//! A session owns the keep-alive connections to one origin. Idle senders are
//! parked after each exchange and reused by the next request; a semaphore caps
//! the number of connections in use at once.

use crate::base::neterror::NetError;
use crate::dns::Resolve;
use crate::http::response::HttpResponse;
use crate::socket::{ConnectJob, Origin, TlsConfig};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, ACCEPT, HOST, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

/// Sent when the caller supplies no `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("scrapegate/", env!("CARGO_PKG_VERSION"));

type Sender = http1::SendRequest<Empty<Bytes>>;

pub struct Session {
    origin: Origin,
    resolver: Arc<dyn Resolve>,
    tls: TlsConfig,
    idle: Mutex<VecDeque<Sender>>,
    permits: Semaphore,
    max_connections: usize,
}

impl Session {
    pub fn new(
        origin: Origin,
        resolver: Arc<dyn Resolve>,
        tls: TlsConfig,
        max_connections: usize,
    ) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            origin,
            resolver,
            tls,
            idle: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(max_connections),
            max_connections,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of parked keep-alive connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Sends a GET for `url` and reads the whole response.
    ///
    /// A parked connection is tried first. If it turns out to be dead before a
    /// response arrives, the request is replayed once on a fresh connection.
    pub async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, NetError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NetError::ConnectionAborted)?;

        if let Some(sender) = self.checkout() {
            match self.exchange(sender, url, headers).await {
                Ok(resp) => return Ok(resp),
                Err(e @ NetError::HttpBodyError) => return Err(e),
                Err(e) => {
                    tracing::debug!(origin = %self.origin, error = %e, "reused connection failed, reconnecting");
                }
            }
        }

        let sender = self.connect().await?;
        self.exchange(sender, url, headers).await
    }

    fn checkout(&self) -> Option<Sender> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(sender) = idle.pop_back() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    fn checkin(&self, sender: Sender) {
        if sender.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_connections {
                idle.push_back(sender);
            }
        }
    }

    async fn connect(&self) -> Result<Sender, NetError> {
        let socket = ConnectJob::connect(&self.origin, self.resolver.as_ref(), &self.tls).await?;
        let peer = socket.peer_addr().ok();
        let secure = socket.is_secure();
        let io = TokioIo::new(socket);
        let (sender, conn) = http1::handshake(io).await.map_err(|e| {
            tracing::debug!(origin = %self.origin, error = %e, "http1 handshake failed");
            NetError::ConnectionFailed
        })?;

        let origin = self.origin.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(origin = %origin, error = %e, "connection closed with error");
            }
        });

        tracing::debug!(origin = %self.origin, peer = ?peer, secure, "opened connection");
        Ok(sender)
    }

    async fn exchange(
        &self,
        mut sender: Sender,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, NetError> {
        sender.ready().await.map_err(|_| NetError::ConnectionClosed)?;

        let req = self.build_request(url, headers)?;
        let resp = sender.send_request(req).await.map_err(|e| {
            tracing::debug!(origin = %self.origin, error = %e, "request failed");
            NetError::ConnectionClosed
        })?;

        let (parts, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|_| NetError::HttpBodyError)?
            .to_bytes();

        self.checkin(sender);
        Ok(HttpResponse::new(parts.status, parts.headers, url.clone(), body))
    }

    fn build_request(&self, url: &Url, headers: &HeaderMap) -> Result<Request<Empty<Bytes>>, NetError> {
        let target = &url[url::Position::BeforePath..url::Position::AfterQuery];
        let mut req = Request::builder()
            .method(Method::GET)
            .uri(target)
            .body(Empty::<Bytes>::new())
            .map_err(|_| NetError::InvalidUrl)?;

        let map = req.headers_mut();
        let host = HeaderValue::from_str(&self.origin.host_header()).map_err(|_| NetError::InvalidUrl)?;
        map.insert(HOST, host);
        for (name, value) in headers {
            if name != HOST {
                map.append(name.clone(), value.clone());
            }
        }
        if !map.contains_key(USER_AGENT) {
            map.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        if !map.contains_key(ACCEPT) {
            map.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        Ok(req)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("origin", &self.origin)
            .field("idle", &self.idle_count())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GaiResolver;

    fn session(url: &str) -> Session {
        let origin = Origin::from_url(&Url::parse(url).unwrap()).unwrap();
        Session::new(origin, Arc::new(GaiResolver::new()), TlsConfig::verified(), 10)
    }

    #[test]
    fn test_request_defaults() {
        let s = session("https://api.tmdb.org/");
        let url = Url::parse("https://api.tmdb.org/3/movie/550?language=zh-CN#frag").unwrap();
        let req = s.build_request(&url, &HeaderMap::new()).unwrap();

        assert_eq!(req.uri(), "/3/movie/550?language=zh-CN");
        assert_eq!(req.headers()[HOST], "api.tmdb.org");
        assert_eq!(req.headers()[USER_AGENT], DEFAULT_USER_AGENT);
        assert_eq!(req.headers()[ACCEPT], "*/*");
    }

    #[test]
    fn test_request_keeps_caller_headers() {
        let s = session("http://127.0.0.1:8080/");
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Kodi/21"));
        headers.insert(HOST, HeaderValue::from_static("spoofed"));
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        let req = s.build_request(&url, &headers).unwrap();

        assert_eq!(req.headers()[USER_AGENT], "Kodi/21");
        assert_eq!(req.headers()[HOST], "127.0.0.1:8080");
        assert_eq!(req.headers().get_all(HOST).iter().count(), 1);
    }

    #[test]
    fn test_max_connections_at_least_one() {
        let origin = Origin::from_url(&Url::parse("https://trakt.tv/").unwrap()).unwrap();
        let s = Session::new(origin, Arc::new(GaiResolver::new()), TlsConfig::verified(), 0);
        assert_eq!(s.max_connections(), 1);
        assert_eq!(s.idle_count(), 0);
    }
}
