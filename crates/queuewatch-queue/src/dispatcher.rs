//! Polling dispatcher that routes claimed items to handlers by task kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::QueueError;
use crate::handler::{HandlerRegistry, handle_guarded};
use crate::item::{ItemId, QueueItem};
use crate::payload::{Envelope, TaskPayload, decode};
use crate::store::QueueStore;

/// What one dispatcher iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No pending items.
    Idle,
    /// A handler succeeded and the item is processed.
    Completed { id: ItemId, kind: String },
    /// No handler for the kind (or no kind at all); marked processed unhandled.
    Acknowledged { id: ItemId, kind: Option<String> },
    /// The payload was not JSON; marked processed unhandled.
    Malformed { id: ItemId, error: String },
    /// The handler failed; the item is pending again.
    Requeued { id: ItemId, kind: String, error: String },
    /// The handler failed on the last allowed delivery.
    DeadLettered { id: ItemId, kind: String, error: String },
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub completed: u64,
    pub acknowledged: u64,
    pub malformed: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// Iterations that ended in a storage error.
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    acknowledged: AtomicU64,
    malformed: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    errors: AtomicU64,
}

/// Long-running watcher loop.
///
/// Handles one item at a time: the handler call is awaited before the next
/// claim. Run several dispatchers (usually in separate processes) against
/// the same database for throughput.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    handlers: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    counters: Counters,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        store: Arc<dyn QueueStore>,
        handlers: Arc<HandlerRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            handlers,
            config,
            counters: Counters::default(),
        }
    }

    pub fn claimant(&self) -> &str {
        &self.config.claimant
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.counters;
        DispatcherStats {
            completed: c.completed.load(Ordering::SeqCst),
            acknowledged: c.acknowledged.load(Ordering::SeqCst),
            malformed: c.malformed.load(Ordering::SeqCst),
            requeued: c.requeued.load(Ordering::SeqCst),
            dead_lettered: c.dead_lettered.load(Ordering::SeqCst),
            errors: c.errors.load(Ordering::SeqCst),
        }
    }

    /// Claim, route and settle at most one item.
    pub async fn run_once(&self) -> Result<DispatchOutcome, QueueError> {
        let result = match self.store.claim(&self.config.claimant).await {
            Ok(Some(item)) => self.dispatch(item).await,
            Ok(None) => Ok(DispatchOutcome::Idle),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn dispatch(&self, item: QueueItem) -> Result<DispatchOutcome, QueueError> {
        let envelope = match decode(&item.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(item_id = %item.id, "Undecodable payload, acknowledging: {}", e);
                self.store.complete(&item.id).await?;
                self.counters.malformed.fetch_add(1, Ordering::SeqCst);
                return Ok(DispatchOutcome::Malformed {
                    id: item.id,
                    error: e.to_string(),
                });
            }
        };

        let TaskPayload { kind, data } = match envelope {
            Envelope::Task(task) => task,
            Envelope::Untagged(_) => {
                warn!(item_id = %item.id, "Payload has no task kind, acknowledging");
                return self.acknowledge(item.id, None).await;
            }
        };

        let Some(handler) = self.handlers.get(&kind) else {
            info!(item_id = %item.id, kind = %kind, "No handler for kind, acknowledging");
            return self.acknowledge(item.id, Some(kind)).await;
        };

        debug!(item_id = %item.id, kind = %kind, attempt = item.attempts, "Dispatching");
        match handle_guarded(handler.as_ref(), &data).await {
            Ok(()) => {
                self.store.complete(&item.id).await?;
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                info!(item_id = %item.id, kind = %kind, "Task completed");
                Ok(DispatchOutcome::Completed { id: item.id, kind })
            }
            Err(e) => self.settle_failure(item, kind, e).await,
        }
    }

    async fn acknowledge(
        &self,
        id: ItemId,
        kind: Option<String>,
    ) -> Result<DispatchOutcome, QueueError> {
        self.store.complete(&id).await?;
        self.counters.acknowledged.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchOutcome::Acknowledged { id, kind })
    }

    async fn settle_failure(
        &self,
        item: QueueItem,
        kind: String,
        err: QueueError,
    ) -> Result<DispatchOutcome, QueueError> {
        let error = err.to_string();
        let exhausted = self
            .config
            .max_deliveries
            .is_some_and(|max| item.attempts >= max);

        if exhausted {
            error!(item_id = %item.id, kind = %kind, attempt = item.attempts, "Handler failed, dead-lettering: {}", error);
            self.store.fail(&item.id, &error).await?;
            self.counters.dead_lettered.fetch_add(1, Ordering::SeqCst);
            Ok(DispatchOutcome::DeadLettered {
                id: item.id,
                kind,
                error,
            })
        } else {
            error!(item_id = %item.id, kind = %kind, attempt = item.attempts, "Handler failed, requeueing: {}", error);
            self.store.requeue(&item.id).await?;
            self.counters.requeued.fetch_add(1, Ordering::SeqCst);
            Ok(DispatchOutcome::Requeued {
                id: item.id,
                kind,
                error,
            })
        }
    }

    /// Poll until `shutdown` is cancelled or the store fails fatally.
    ///
    /// Shutdown is checked between items; a running handler is never
    /// interrupted.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), QueueError> {
        let claimant = self.config.claimant.as_str();
        info!(
            claimant,
            poll_interval_ms = self.config.poll_interval_ms,
            kinds = ?self.handlers.kinds(),
            "Dispatcher started"
        );

        if self.config.recover_on_start {
            match self.store.release_claimed(claimant).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(claimant, "Could not release stale claims: {}", e),
            }
        }

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let wait = match self.run_once().await {
                Ok(DispatchOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) if e.is_fatal() => {
                    error!(claimant, "Dispatcher stopping on storage failure: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(claimant, "Dispatch iteration failed: {}", e);
                    true
                }
            };

            if wait {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }

        info!(claimant, stats = ?self.stats(), "Dispatcher stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
