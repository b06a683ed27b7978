//! The loopback fetch daemon.
//!
//! - [`server`]: bind, accept loop, idle self-termination, drain
//! - [`handler`]: one request document in, one response document out
//! - [`workerpool`]: lazily created fetch workers with idle eviction
//! - [`announce`]: port file publication

pub mod announce;
pub mod handler;
pub mod server;
pub mod workerpool;

pub use announce::PortFile;
pub use handler::{Dispatcher, MAX_REQUEST_BYTES};
pub use server::{Components, Daemon, DaemonHandle};
pub use workerpool::{FetchHandle, WorkerPoolManager};
