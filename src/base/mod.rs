//! Base types and error handling.
//!
//! Provides foundational types shared by every layer of the daemon:
//! - [`NetError`]: Network error codes in the style of `net_error_list.h`
//! - [`IoResultExt`] / [`with_deadline`]: context helpers that turn raw failures
//!   into descriptive `NetError` values

pub mod context;
pub mod neterror;

pub use context::{with_deadline, IoResultExt};
pub use neterror::NetError;
