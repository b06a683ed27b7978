//! Socket and connection management.
//!
//! Provides the outbound connection flow shared by sessions and the prober:
//! - [`connectjob`]: DNS → TCP → TLS connection flow for one [`Origin`]
//! - [`probe`]: TLS reachability checks for operator-supplied addresses
//! - [`stream`]: plain or TLS upstream socket
//! - [`tls`]: TLS configuration with BoringSSL

pub mod connectjob;
pub mod probe;
pub mod stream;
pub mod tls;

pub use connectjob::{ConnectJob, Origin};
pub use probe::{Probe, ProbeTarget, Probing, TlsProber};
pub use stream::UpstreamStream;
pub use tls::TlsConfig;
