//! Queue persistence store.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::{RetryConfig, StoreConfig};
use crate::error::QueueError;
use crate::item::{ItemId, ItemStatus, QueueItem, format_timestamp, parse_timestamp};
use crate::retry::with_contention_retry;
use crate::schema::init_schema;

/// Queue store trait.
///
/// Implementations own all persisted queue state. Producers, consumers and
/// dispatchers share one instance behind `Arc<dyn QueueStore>`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a payload as a new pending item.
    async fn enqueue(&self, payload: serde_json::Value) -> Result<ItemId, QueueError>;

    /// Claim the oldest pending item for `claimant`, if any.
    async fn claim(&self, claimant: &str) -> Result<Option<QueueItem>, QueueError>;

    /// Mark a claimed item processed. Completing a processed item is a no-op.
    async fn complete(&self, id: &ItemId) -> Result<(), QueueError>;

    /// Return a claimed item to pending at its original queue position.
    async fn requeue(&self, id: &ItemId) -> Result<(), QueueError>;

    /// Dead-letter a claimed item.
    async fn fail(&self, id: &ItemId, error: &str) -> Result<(), QueueError>;

    /// Load an item by ID.
    async fn get(&self, id: &ItemId) -> Result<Option<QueueItem>, QueueError>;

    /// Count items per status.
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Return every item still claimed by `claimant` to pending.
    async fn release_claimed(&self, claimant: &str) -> Result<usize, QueueError>;
}

/// Item counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub processed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.processed + self.failed
    }

    fn add(&mut self, status: ItemStatus, count: u64) {
        match status {
            ItemStatus::Pending => self.pending += count,
            ItemStatus::Claimed => self.claimed += count,
            ItemStatus::Processed => self.processed += count,
            ItemStatus::Failed => self.failed += count,
        }
    }
}

const COLUMNS: &str =
    "id, data, status, created_at, claimed_at, processed_at, claimant, attempts, last_error";

/// Claim is a single conditional update: the row only changes if it is
/// still pending when the write lock is held, so concurrent claimers in
/// other processes cannot both win.
const CLAIM_SQL: &str = "UPDATE queue
    SET status = 'claimed', claimant = ?1, claimed_at = ?2, attempts = attempts + 1
    WHERE id = (
        SELECT id FROM queue WHERE status = 'pending'
        ORDER BY created_at ASC, rowid ASC LIMIT 1
    ) AND status = 'pending'
    RETURNING id, data, status, created_at, claimed_at, processed_at, claimant, attempts, last_error";

const REJECT_SQL: &str = "UPDATE queue
    SET status = 'failed', processed_at = ?2, last_error = ?3
    WHERE id = ?1 AND status = 'claimed'";

/// Row as stored, before status and timestamp parsing.
struct RawItem {
    id: String,
    data: String,
    status: String,
    created_at: String,
    claimed_at: Option<String>,
    processed_at: Option<String>,
    claimant: Option<String>,
    attempts: i64,
    last_error: Option<String>,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            claimed_at: row.get(4)?,
            processed_at: row.get(5)?,
            claimant: row.get(6)?,
            attempts: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    fn into_item(self) -> Result<QueueItem, QueueError> {
        Ok(QueueItem {
            id: ItemId::new(self.id),
            data: self.data,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            claimed_at: self.claimed_at.as_deref().map(parse_timestamp).transpose()?,
            processed_at: self.processed_at.as_deref().map(parse_timestamp).transpose()?,
            claimant: self.claimant,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_error: self.last_error,
        })
    }
}

/// A conditional status change out of `claimed`.
struct Transition {
    op: &'static str,
    to: ItemStatus,
    /// Current status for which the call is a successful no-op.
    already: Option<ItemStatus>,
    sql: &'static str,
    params: Vec<Option<String>>,
}

/// SQLite-backed queue store.
///
/// Safe to share across tasks in one process and across processes using the
/// same database file.
pub struct SqliteQueueStore {
    conn: Connection,
    retry: RetryConfig,
    /// Serializes claims from this process.
    claim_lock: Mutex<()>,
}

impl SqliteQueueStore {
    /// Open (or create) the database described by `config`.
    pub async fn open(config: &StoreConfig) -> Result<Self, QueueError> {
        let path = config.resolved_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    QueueError::Database(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&path).await?;
        let busy_timeout = config.busy_timeout();
        let wal = config.wal;
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if wal {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            init_schema(conn)?;
            Ok(())
        })
        .await?;

        info!(path = %path.display(), wal, "Opened queue store");
        Ok(Self::from_connection(conn))
    }

    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| Ok(init_schema(conn)?)).await?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            retry: RetryConfig::default(),
            claim_lock: Mutex::new(()),
        }
    }

    /// Set the contention retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn transition(&self, id: &ItemId, t: Transition) -> Result<(), QueueError> {
        let outcome = with_contention_retry(&self.retry, t.op, || {
            let sql = t.sql;
            let params = t.params.clone();
            let id = id.to_string();
            async move {
                self.conn
                    .call(move |conn| {
                        let changed = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
                        if changed > 0 {
                            return Ok(None);
                        }
                        let current: Option<String> = conn
                            .query_row("SELECT status FROM queue WHERE id = ?1", [&id], |row| {
                                row.get(0)
                            })
                            .optional()?;
                        Ok(Some(current))
                    })
                    .await
                    .map_err(QueueError::from)
            }
        })
        .await?;

        match outcome {
            None => {
                debug!(item_id = %id, to = %t.to, "Item {}", t.op);
                Ok(())
            }
            Some(None) => Err(QueueError::TaskNotFound(id.to_string())),
            Some(Some(raw)) => {
                let current: ItemStatus = raw.parse()?;
                if Some(current) == t.already {
                    debug!(item_id = %id, status = %current, "{} is a no-op", t.op);
                    Ok(())
                } else {
                    Err(QueueError::InvalidTransition {
                        id: id.to_string(),
                        from: current.to_string(),
                        to: t.to.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<ItemId, QueueError> {
        let id = ItemId::generate();
        let data = serde_json::to_string(&payload)?;
        let created_at = format_timestamp(Utc::now());

        with_contention_retry(&self.retry, "enqueue", || {
            let id = id.to_string();
            let data = data.clone();
            let created_at = created_at.clone();
            async move {
                self.conn
                    .call(move |conn| {
                        conn.execute(
                            "INSERT INTO queue (id, data, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
                            params![id, data, created_at],
                        )?;
                        Ok(())
                    })
                    .await
                    .map_err(QueueError::from)
            }
        })
        .await?;

        debug!(item_id = %id, "Enqueued item");
        Ok(id)
    }

    async fn claim(&self, claimant: &str) -> Result<Option<QueueItem>, QueueError> {
        let _guard = self.claim_lock.lock().await;

        let (item, rejected) = with_contention_retry(&self.retry, "claim", || {
            let claimant = claimant.to_string();
            let claimed_at = format_timestamp(Utc::now());
            async move {
                self.conn
                    .call(move |conn| {
                        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                        let mut rejected = Vec::new();
                        // Rows that cannot be read back are settled in the same
                        // transaction, then the next pending row is tried.
                        let item = loop {
                            let Some(raw) = tx
                                .query_row(
                                    CLAIM_SQL,
                                    params![claimant, claimed_at],
                                    RawItem::from_row,
                                )
                                .optional()?
                            else {
                                break None;
                            };
                            let id = raw.id.clone();
                            match raw.into_item() {
                                Ok(item) => break Some(item),
                                Err(e) => {
                                    let reason = e.to_string();
                                    tx.execute(REJECT_SQL, params![id, claimed_at, reason])?;
                                    rejected.push((id, reason));
                                }
                            }
                        };
                        tx.commit()?;
                        Ok((item, rejected))
                    })
                    .await
                    .map_err(QueueError::from)
            }
        })
        .await?;

        for (id, reason) in rejected {
            warn!(item_id = %id, claimant, "Unreadable item marked failed: {}", reason);
        }
        let Some(item) = item else {
            return Ok(None);
        };
        debug!(item_id = %item.id, claimant, attempts = item.attempts, "Claimed item");
        Ok(Some(item))
    }

    async fn complete(&self, id: &ItemId) -> Result<(), QueueError> {
        self.transition(
            id,
            Transition {
                op: "complete",
                to: ItemStatus::Processed,
                already: Some(ItemStatus::Processed),
                sql: "UPDATE queue SET status = 'processed', processed_at = ?2
                      WHERE id = ?1 AND status = 'claimed'",
                params: vec![Some(id.to_string()), Some(format_timestamp(Utc::now()))],
            },
        )
        .await
    }

    async fn requeue(&self, id: &ItemId) -> Result<(), QueueError> {
        self.transition(
            id,
            Transition {
                op: "requeue",
                to: ItemStatus::Pending,
                already: Some(ItemStatus::Pending),
                sql: "UPDATE queue SET status = 'pending', claimant = NULL, claimed_at = NULL
                      WHERE id = ?1 AND status = 'claimed'",
                params: vec![Some(id.to_string())],
            },
        )
        .await
    }

    async fn fail(&self, id: &ItemId, error: &str) -> Result<(), QueueError> {
        self.transition(
            id,
            Transition {
                op: "fail",
                to: ItemStatus::Failed,
                already: None,
                sql: "UPDATE queue SET status = 'failed', processed_at = ?2, last_error = ?3
                      WHERE id = ?1 AND status = 'claimed'",
                params: vec![
                    Some(id.to_string()),
                    Some(format_timestamp(Utc::now())),
                    Some(error.to_string()),
                ],
            },
        )
        .await
    }

    async fn get(&self, id: &ItemId) -> Result<Option<QueueItem>, QueueError> {
        let raw = with_contention_retry(&self.retry, "get", || {
            let id = id.to_string();
            async move {
                self.conn
                    .call(move |conn| {
                        let sql = format!("SELECT {} FROM queue WHERE id = ?1", COLUMNS);
                        Ok(conn.query_row(&sql, [id], RawItem::from_row).optional()?)
                    })
                    .await
                    .map_err(QueueError::from)
            }
        })
        .await?;

        raw.map(RawItem::into_item).transpose()
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = with_contention_retry(&self.retry, "stats", || async {
            self.conn
                .call(|conn| {
                    let mut stmt =
                        conn.prepare("SELECT status, COUNT(*) FROM queue GROUP BY status")?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await
                .map_err(QueueError::from)
        })
        .await?;

        let mut stats = QueueStats::default();
        for (raw, count) in rows {
            match raw.parse::<ItemStatus>() {
                Ok(status) => stats.add(status, count.max(0) as u64),
                Err(_) => warn!(status = %raw, count, "Ignoring rows with unknown status"),
            }
        }
        Ok(stats)
    }

    async fn release_claimed(&self, claimant: &str) -> Result<usize, QueueError> {
        let released = with_contention_retry(&self.retry, "release_claimed", || {
            let claimant = claimant.to_string();
            async move {
                self.conn
                    .call(move |conn| {
                        Ok(conn.execute(
                            "UPDATE queue SET status = 'pending', claimant = NULL, claimed_at = NULL
                             WHERE status = 'claimed' AND claimant = ?1",
                            [claimant],
                        )?)
                    })
                    .await
                    .map_err(QueueError::from)
            }
        })
        .await?;

        if released > 0 {
            info!(claimant, released, "Released items left claimed by a previous run");
        }
        Ok(released)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
