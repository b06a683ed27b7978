use crate::base::neterror::NetError;
use boring::ssl::{ConnectConfiguration, SslConnector, SslMethod, SslVerifyMode, SslVersion};

/// TLS client configuration shared by outbound sessions and the prober.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    pub cipher_list: String,
    pub alpn_protos: Vec<String>,
    /// Verify the peer certificate chain and hostname.
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::verified()
    }
}

impl TlsConfig {
    /// Configuration for real fetches: full certificate and hostname checks.
    pub fn verified() -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            cipher_list:
                "TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384:TLS_CHACHA20_POLY1305_SHA256:\
                ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
                ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
                ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
                ECDHE-RSA-AES128-SHA:ECDHE-RSA-AES256-SHA:\
                AES128-GCM-SHA256:AES256-GCM-SHA384:AES128-SHA:AES256-SHA"
                    .to_string(),
            // Sessions speak HTTP/1.1 only
            alpn_protos: vec!["http/1.1".to_string()],
            verify_peer: true,
        }
    }

    /// Configuration for reachability probes against operator-supplied
    /// addresses. The handshake only has to complete; the chain is not checked.
    pub fn probe() -> Self {
        Self {
            min_version: None,
            alpn_protos: Vec::new(),
            verify_peer: false,
            ..Self::verified()
        }
    }

    /// Build a per-connection configuration from this config.
    pub fn configure(&self) -> Result<ConnectConfiguration, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;

        if let Some(min) = self.min_version {
            builder.set_min_proto_version(Some(min)).map_err(|_| NetError::SslProtocolError)?;
        }
        if let Some(max) = self.max_version {
            builder.set_max_proto_version(Some(max)).map_err(|_| NetError::SslProtocolError)?;
        }

        builder.set_cipher_list(&self.cipher_list).map_err(|_| NetError::SslProtocolError)?;

        if !self.alpn_protos.is_empty() {
            let mut alpn_wire = Vec::new();
            for proto in &self.alpn_protos {
                if proto.len() > 255 {
                    return Err(NetError::SslProtocolError);
                }
                alpn_wire.push(proto.len() as u8);
                alpn_wire.extend_from_slice(proto.as_bytes());
            }
            builder.set_alpn_protos(&alpn_wire).map_err(|_| NetError::SslProtocolError)?;
        }

        if self.verify_peer {
            builder.set_verify(SslVerifyMode::PEER);
        } else {
            builder.set_verify(SslVerifyMode::NONE);
        }

        let connector = builder.build();
        let mut config = connector.configure().map_err(|_| NetError::SslProtocolError)?;
        if !self.verify_peer {
            config.set_verify_hostname(false);
        }
        Ok(config)
    }

    /// Per-connection configuration for `host`. SNI is only sent for
    /// hostnames.
    pub fn connect_config(&self, host: &str) -> Result<ConnectConfiguration, NetError> {
        let mut config = self.configure()?;
        if !Self::should_set_sni(host) {
            config.set_use_server_name_indication(false);
        }
        Ok(config)
    }

    /// Check if SNI (Server Name Indication) should be set for this host.
    /// Per RFC 6066, SNI MUST NOT be set for raw IP addresses.
    pub fn should_set_sni(host: &str) -> bool {
        crate::dns::parse_ip_literal(host).is_none()
    }
}
