//! Queue configuration.
//!
//! The queue crate consumes the sections of the application config that
//! concern it; the types live in `queuewatch-config` so the binary can load
//! them from one file.

pub use queuewatch_config::{ConsumerConfig, DispatcherConfig, RetryConfig, StoreConfig};
