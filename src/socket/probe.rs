//! Reachability probing for operator-supplied address overrides.
//!
//! An override is only worth routing traffic to if the address actually
//! terminates TLS for the intended host. The probe opens a TCP connection and
//! completes a TLS handshake (certificate checks disabled, the hostname sent
//! as SNI) within a single deadline. There are no retries; the caller decides
//! what to do on failure.

use crate::base::context::{with_deadline, IoResultExt};
use crate::base::neterror::NetError;
use crate::socket::tls::TlsConfig;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;

/// Port probed when the caller does not supply one.
pub const DEFAULT_PROBE_PORT: u16 = 443;

/// Default deadline for connect + handshake.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Alias for the `Future` type returned by a prober.
pub type Probing = Pin<Box<dyn Future<Output = Result<(), NetError>> + Send>>;

/// A single probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub addr: IpAddr,
    /// Hostname used for SNI; the address itself when absent.
    pub host: Option<String>,
    pub port: u16,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            host: None,
            port: DEFAULT_PROBE_PORT,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Capability to check that an address serves TLS.
pub trait Probe: Send + Sync {
    fn probe(&self, target: ProbeTarget) -> Probing;
}

/// TCP + TLS handshake prober backed by BoringSSL.
#[derive(Debug, Clone)]
pub struct TlsProber {
    tls: TlsConfig,
}

impl Default for TlsProber {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsProber {
    pub fn new() -> Self {
        Self { tls: TlsConfig::probe() }
    }
}

impl Probe for TlsProber {
    fn probe(&self, target: ProbeTarget) -> Probing {
        let tls = self.tls.clone();
        Box::pin(async move {
            let peer = SocketAddr::new(target.addr, target.port);
            let sni = target.host.clone().unwrap_or_else(|| target.addr.to_string());

            let handshake = async {
                let stream = TcpStream::connect(peer)
                    .await
                    .connection_context(&peer.ip().to_string(), peer.port())?;
                let config = tls.connect_config(&sni)?;
                tokio_boring::connect(config, &sni, stream).await.map_err(|e| {
                    NetError::SslHandshakeFailed {
                        host: sni.clone(),
                        reason: format!("{:?}", e),
                    }
                })?;
                Ok::<(), NetError>(())
            };

            match with_deadline(target.timeout, handshake).await {
                Ok(()) => {
                    tracing::info!(peer = %peer, host = %sni, "TLS reachability check succeeded");
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, host = %sni, error = %e, "TLS reachability check failed");
                    Err(e)
                }
            }
        })
    }
}
