//! Queue item definitions.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

/// Opaque item identifier, assigned at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier, e.g. one written by another producer.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting to be claimed.
    Pending,
    /// Held by one consumer or dispatcher.
    Claimed,
    /// Finished successfully.
    Processed,
    /// Dead-lettered after exhausting its deliveries.
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Claimed => "claimed",
            ItemStatus::Processed => "processed",
            ItemStatus::Failed => "failed",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Processed | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            // "processing" and "completed" are written by older producer scripts.
            "claimed" | "processing" => Ok(ItemStatus::Claimed),
            "processed" | "completed" => Ok(ItemStatus::Processed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(QueueError::Decode(format!("unknown item status '{}'", other))),
        }
    }
}

/// A persisted work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    /// Serialized payload exactly as the producer stored it.
    pub data: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimant: Option<String>,
    /// Number of times the item has been claimed.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Parse the stored payload as JSON.
    pub fn payload(&self) -> Result<serde_json::Value, QueueError> {
        serde_json::from_str(&self.data).map_err(|e| QueueError::Decode(e.to_string()))
    }
}

/// Render a timestamp the way the store persists it.
///
/// Matches SQLite's `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` so rows written by
/// this crate and by plain SQL sort together.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Also accepts `CURRENT_TIMESTAMP` output.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| QueueError::Decode(format!("invalid timestamp '{}': {}", raw, e)))
}
