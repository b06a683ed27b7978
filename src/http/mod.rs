//! Outbound HTTP: per-origin sessions and the fetch surface built on them.

pub mod fetch;
pub mod response;
pub mod session;
pub mod sessionpool;

// Re-exports for convenience
pub use fetch::{Fetch, FetchResult, FetchSpec, Fetching, NO_URL_PROVIDED};
pub use response::HttpResponse;
pub use session::{Session, DEFAULT_USER_AGENT};
pub use sessionpool::{SessionPool, SessionPoolConfig};
