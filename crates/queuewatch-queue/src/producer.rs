//! Producers append work to the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::item::ItemId;
use crate::payload::TaskPayload;
use crate::store::QueueStore;

/// Appends items to a shared store.
///
/// Any number of producers may run alongside consumers and dispatchers,
/// in this process or another one using the same database file.
#[derive(Clone)]
pub struct Producer {
    id: String,
    store: Arc<dyn QueueStore>,
    interval: Duration,
}

impl Producer {
    /// Create a new producer.
    pub fn new(id: impl Into<String>, store: Arc<dyn QueueStore>) -> Self {
        Self {
            id: id.into(),
            store,
            interval: Duration::ZERO,
        }
    }

    /// Pause between items in [`produce`](Self::produce).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue a task of the given kind.
    pub async fn submit(&self, kind: &str, data: Value) -> Result<ItemId, QueueError> {
        self.submit_payload(TaskPayload::new(kind, data)).await
    }

    pub async fn submit_payload(&self, payload: TaskPayload) -> Result<ItemId, QueueError> {
        let kind = payload.kind.clone();
        let id = self.store.enqueue(payload.to_value()?).await?;
        debug!(producer = %self.id, item_id = %id, kind = %kind, "Submitted task");
        Ok(id)
    }

    /// Enqueue an arbitrary JSON payload as-is.
    pub async fn submit_raw(&self, payload: Value) -> Result<ItemId, QueueError> {
        let id = self.store.enqueue(payload).await?;
        debug!(producer = %self.id, item_id = %id, "Submitted raw payload");
        Ok(id)
    }

    /// Enqueue each payload in order, returning their ids.
    ///
    /// Stops at the first storage error; earlier items stay enqueued.
    pub async fn produce<I>(&self, items: I) -> Result<Vec<ItemId>, QueueError>
    where
        I: IntoIterator<Item = TaskPayload>,
    {
        let mut ids = Vec::new();
        for (n, payload) in items.into_iter().enumerate() {
            if n > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            ids.push(self.submit_payload(payload).await?);
        }
        info!(producer = %self.id, count = ids.len(), "Producer finished");
        Ok(ids)
    }

    /// Run [`produce`](Self::produce) on a background task.
    pub fn spawn(self, items: Vec<TaskPayload>) -> JoinHandle<Result<Vec<ItemId>, QueueError>> {
        tokio::spawn(async move { self.produce(items).await })
    }
}
