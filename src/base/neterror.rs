use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo { host: String, port: u16, reason: String },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name not resolved for {domain}: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("SSL handshake with {host} failed: {reason}")]
    SslHandshakeFailed { host: String, reason: String },
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Address in use")]
    AddressInUse,
    #[error("Message too big")]
    MsgTooBig,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("{status} {reason} for url: {url}")]
    HttpStatus { status: u16, reason: String, url: String },
    #[error("Request timed out after {0} ms")]
    RequestTimedOut(u64),

    // Local protocol errors
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl NetError {
    /// Builds a [`NetError::ConnectionFailedTo`] from an I/O failure.
    pub fn connection_failed_to(host: &str, port: u16, err: std::io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            reason: err.to_string(),
        }
    }

    /// Builds a [`NetError::NameNotResolvedFor`] from an I/O failure.
    pub fn dns_failed(domain: &str, err: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: err.to_string(),
        }
    }

    /// Numeric code carried in logs next to the message.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SslHandshakeFailed { .. } => -107,
            NetError::AddressInvalid => -108,
            NetError::AddressUnreachable => -109,
            NetError::ConnectionTimedOut => -118,
            NetError::MsgTooBig => -142,
            NetError::AddressInUse => -147,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::TooManyRedirects => -310,
            NetError::InvalidResponse => -320,
            NetError::EmptyResponse => -324,
            // Custom codes starting at -1000, clear of the Chromium ranges
            NetError::HttpBodyError => -1000,
            NetError::HttpStatus { .. } => -1001,
            NetError::RequestTimedOut(_) => -1002,
            NetError::MalformedPayload(_) => -1003,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionReset => NetError::ConnectionReset,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            ErrorKind::AddrInUse => NetError::AddressInUse,
            ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            _ => NetError::ConnectionFailed,
        }
    }
}
