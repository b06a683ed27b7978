use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::dns::{parse_ip_literal, Name, Resolve};
use crate::socket::stream::UpstreamStream;
use crate::socket::tls::TlsConfig;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use url::Url;

/// Identifies a connection target (scheme, host, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    pub fn from_url(url: &Url) -> Option<Self> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return None;
        }
        Some(Origin {
            scheme: scheme.to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default()?,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// Value for the `Host` request header: the port is omitted when it is
    /// the scheme default.
    pub fn host_header(&self) -> String {
        let default_port = if self.is_https() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Manages the connection process: DNS -> TCP -> SSL.
/// Roughly equivalent to net::ConnectJob.
pub struct ConnectJob;

impl ConnectJob {
    pub async fn connect(
        origin: &Origin,
        resolver: &dyn Resolve,
        tls: &TlsConfig,
    ) -> Result<UpstreamStream, NetError> {
        let host = origin.host();
        let port = origin.port();

        // 1. DNS Resolution (IP literals skip the resolver entirely)
        let addrs: Vec<SocketAddr> = match parse_ip_literal(host) {
            Some(ip) => vec![SocketAddr::new(ip, port)],
            None => resolver
                .resolve(Name::new(host))
                .await?
                .map(|addr| SocketAddr::new(addr.ip(), port))
                .collect(),
        };

        // 2. TCP Connect, first address that answers wins
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await.connection_context(host, port) {
                Ok(s) => {
                    tracing::debug!(origin = %origin, peer = %addr, "tcp connected");
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!(origin = %origin, peer = %addr, error = %e, "tcp connect failed");
                    last_err = Some(e);
                }
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => return Err(last_err.unwrap_or(NetError::NameNotResolved)),
        };
        let _ = stream.set_nodelay(true);

        // 3. SSL Handshake (if https)
        if !origin.is_https() {
            return Ok(UpstreamStream::Plain(stream));
        }

        let config = tls.connect_config(host)?;
        let tls_stream = tokio_boring::connect(config, host, stream).await.map_err(|e| {
            tracing::debug!(origin = %origin, error = ?e, "SSL handshake failed");
            NetError::SslHandshakeFailed {
                host: host.to_string(),
                reason: format!("{:?}", e),
            }
        })?;

        Ok(UpstreamStream::Tls(tls_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::GaiResolver;

    #[test]
    fn test_origin_from_url() {
        let url = Url::parse("https://API.tmdb.org/3/movie/550?language=zh-CN").unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.host(), "api.tmdb.org");
        assert_eq!(origin.port(), 443);
        assert!(origin.is_https());
        assert_eq!(origin.host_header(), "api.tmdb.org");
    }

    #[test]
    fn test_origin_rejects_other_schemes() {
        let url = Url::parse("ftp://fanart.tv/file").unwrap();
        assert!(Origin::from_url(&url).is_none());
    }

    #[test]
    fn test_host_header_keeps_custom_port() {
        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.host_header(), "127.0.0.1:8080");
        assert_eq!(origin.to_string(), "http://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_connect_plain_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let origin = Origin::from_url(&url).unwrap();
        let socket = ConnectJob::connect(&origin, &GaiResolver::new(), &TlsConfig::verified())
            .await
            .unwrap();
        assert!(!socket.is_secure());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let origin = Origin::from_url(&url).unwrap();
        let err = ConnectJob::connect(&origin, &GaiResolver::new(), &TlsConfig::verified())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::ConnectionFailedTo { port: p, .. } if p == port));
    }
}
