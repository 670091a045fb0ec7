//! Task handlers and the kind-to-handler routing table.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::error::QueueError;

/// Performs the work for one task kind.
///
/// Returning `Err` means the item should be retried; the dispatcher requeues
/// it instead of marking it processed.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute a task with its kind-specific data.
    async fn handle(&self, data: &Value) -> Result<(), QueueError>;
}

/// Handler backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), QueueError>> + Send,
{
    async fn handle(&self, data: &Value) -> Result<(), QueueError> {
        (self.f)(data.clone()).await
    }
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), QueueError>> + Send,
{
    FnHandler { f }
}

/// Run `handler`, reporting a panic as [`QueueError::ExecutionFailed`].
pub(crate) async fn handle_guarded(
    handler: &dyn TaskHandler,
    data: &Value,
) -> Result<(), QueueError> {
    AssertUnwindSafe(handler.handle(data))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(QueueError::ExecutionFailed(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Routing table from task kind to handler.
///
/// Built once at start-up, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// Returns an error if the kind already has a handler.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), QueueError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(QueueError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        kind: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<Self, QueueError> {
        self.register(kind, Arc::new(handler))?;
        Ok(self)
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
