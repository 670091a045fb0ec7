//! In-process consumer loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::error::QueueError;
use crate::handler::{TaskHandler, handle_guarded};
use crate::item::{ItemId, QueueItem};
use crate::store::QueueStore;

/// Result of one consumer iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerStep {
    /// Nothing was pending.
    Idle,
    /// The item was processed (or acknowledged as undecodable).
    Completed(ItemId),
    /// The unit of work failed; the item is pending again.
    Requeued(ItemId),
    /// The unit of work failed on its last allowed delivery.
    DeadLettered(ItemId),
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
}

/// Claims items under one identity and runs a unit of work on each.
///
/// The unit of work receives the whole decoded payload. A failure requeues
/// the item and the loop carries on.
pub struct Consumer {
    id: String,
    store: Arc<dyn QueueStore>,
    work: Arc<dyn TaskHandler>,
    config: ConsumerConfig,
    stop: CancellationToken,
    completed: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
}

impl Consumer {
    /// Create a new consumer.
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn QueueStore>,
        work: Arc<dyn TaskHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            work,
            config,
            stop: CancellationToken::new(),
            completed: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Stop when `token` is cancelled instead of using a private token.
    pub fn with_stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask [`run`](Self::run) to return after the current iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            completed: self.completed.load(Ordering::SeqCst),
            requeued: self.requeued.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Claim and settle at most one item.
    pub async fn step(&self) -> Result<ConsumerStep, QueueError> {
        let Some(item) = self.store.claim(&self.id).await? else {
            return Ok(ConsumerStep::Idle);
        };

        let payload = match item.payload() {
            Ok(payload) => payload,
            Err(e) => {
                // A re-claim would hit the same error, so acknowledge it.
                error!(consumer = %self.id, item_id = %item.id, "Undecodable payload: {}", e);
                self.store.complete(&item.id).await?;
                self.completed.fetch_add(1, Ordering::SeqCst);
                return Ok(ConsumerStep::Completed(item.id));
            }
        };

        match handle_guarded(self.work.as_ref(), &payload).await {
            Ok(()) => {
                self.store.complete(&item.id).await?;
                self.completed.fetch_add(1, Ordering::SeqCst);
                debug!(consumer = %self.id, item_id = %item.id, "Completed item");
                Ok(ConsumerStep::Completed(item.id))
            }
            Err(e) => self.settle_failure(item, e).await,
        }
    }

    async fn settle_failure(
        &self,
        item: QueueItem,
        err: QueueError,
    ) -> Result<ConsumerStep, QueueError> {
        let exhausted = self
            .config
            .max_deliveries
            .is_some_and(|max| item.attempts >= max);

        if exhausted {
            error!(
                consumer = %self.id,
                item_id = %item.id,
                attempt = item.attempts,
                "Dead-lettering item: {}",
                err
            );
            self.store.fail(&item.id, &err.to_string()).await?;
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(ConsumerStep::DeadLettered(item.id))
        } else {
            warn!(
                consumer = %self.id,
                item_id = %item.id,
                attempt = item.attempts,
                "Work failed, requeueing: {}",
                err
            );
            self.store.requeue(&item.id).await?;
            self.requeued.fetch_add(1, Ordering::SeqCst);
            Ok(ConsumerStep::Requeued(item.id))
        }
    }

    fn reached_limit(&self) -> bool {
        self.config
            .max_items
            .is_some_and(|max| self.completed.load(Ordering::SeqCst) >= max)
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_backoff()) => {}
        }
    }

    /// Loop until `max_items` completions or a stop request.
    ///
    /// Returns the number of completed items. Only fatal storage errors end
    /// the loop early.
    pub async fn run(&self) -> Result<u64, QueueError> {
        info!(consumer = %self.id, max_items = ?self.config.max_items, "Consumer started");

        while !self.stop.is_cancelled() && !self.reached_limit() {
            match self.step().await {
                Ok(ConsumerStep::Idle) => self.idle().await,
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(consumer = %self.id, "Consumer stopping on storage failure: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(consumer = %self.id, "Iteration failed: {}", e);
                    self.idle().await;
                }
            }
        }

        let completed = self.completed.load(Ordering::SeqCst);
        info!(consumer = %self.id, completed, "Consumer stopped");
        Ok(completed)
    }

    /// Run on a background task.
    pub fn spawn(self) -> ConsumerHandle {
        let consumer = Arc::new(self);
        let runner = consumer.clone();
        let task = tokio::spawn(async move { runner.run().await });
        ConsumerHandle { consumer, task }
    }
}

/// Handle to a spawned [`Consumer`].
pub struct ConsumerHandle {
    consumer: Arc<Consumer>,
    task: JoinHandle<Result<u64, QueueError>>,
}

impl ConsumerHandle {
    pub fn stop(&self) {
        self.consumer.stop();
    }

    pub fn stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Wait for the loop to end and return its completion count.
    pub async fn join(self) -> Result<u64, QueueError> {
        self.task
            .await
            .map_err(|e| QueueError::Custom(format!("Consumer task failed: {}", e)))?
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
