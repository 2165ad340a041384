//! herald library crate.
//!
//! Channel-agnostic notification dispatch: callers hand over a notification,
//! get back a completion handle, and observe lifecycle events while delivery
//! runs on a fixed worker pool.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;

pub use config::{DispatcherConfig, RetryConfig};
pub use error::{DeliveryError, Error, Result, ValidationError};
pub use notification::{DispatchHandle, Dispatcher, DispatcherBuilder, Notification};
