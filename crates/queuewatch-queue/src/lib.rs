//! # queuewatch Queue
//!
//! Durable FIFO task queue on a single SQLite file.
//!
//! ## Features
//!
//! - Atomic claim of the oldest pending item, safe across processes
//! - Producers, in-process consumers and a polling dispatcher sharing one store
//! - Routing by task kind through a handler registry
//! - Bounded retry when SQLite reports the database busy or locked
//! - Optional dead-lettering after a number of failed deliveries

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod item;
pub mod payload;
pub mod producer;
pub mod retry;
pub mod schema;
pub mod store;

pub use config::{ConsumerConfig, DispatcherConfig, RetryConfig, StoreConfig};
pub use consumer::{Consumer, ConsumerHandle, ConsumerStats, ConsumerStep};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherStats};
pub use error::QueueError;
pub use handler::{FnHandler, HandlerRegistry, TaskHandler, handler_fn};
pub use item::{ItemId, ItemStatus, QueueItem};
pub use payload::{Envelope, TaskPayload, decode};
pub use producer::Producer;
pub use retry::with_contention_retry;
pub use store::{QueueStats, QueueStore, SqliteQueueStore};
