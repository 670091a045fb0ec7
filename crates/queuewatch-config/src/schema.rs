//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::ConfigLoader;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Task kind -> external handler command.
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file. `~` is expanded at open time.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long SQLite waits on a locked database before reporting busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Use write-ahead logging so readers and the single writer don't block each other.
    #[serde(default = "default_true")]
    pub wal: bool,
}

impl StoreConfig {
    /// Store at the given path with default tuning.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path with shell-style expansion applied.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.path.to_string_lossy()))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal: true,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("~/.queuewatch/queue.db")
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Retry policy for storage contention (SQLite busy/locked).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per storage operation, including the first.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Base backoff; the wait after attempt `n` is `backoff_ms * n`.
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

/// Watcher process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Identity stamped on claimed items.
    #[serde(default = "default_claimant")]
    pub claimant: String,

    /// Sleep between polls of an empty queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Dead-letter an item once it has been delivered this many times and
    /// failed again. Unset means failed items are requeued forever.
    #[serde(default)]
    pub max_deliveries: Option<u32>,

    /// Return items still claimed under `claimant` to pending on start-up.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            claimant: default_claimant(),
            poll_interval_ms: default_poll_interval_ms(),
            max_deliveries: None,
            recover_on_start: true,
        }
    }
}

fn default_claimant() -> String {
    "watcher".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

/// In-process consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Stop after this many completed items. Unset means run until stopped.
    #[serde(default)]
    pub max_items: Option<u64>,

    /// Sleep when the queue is empty.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Same meaning as [`DispatcherConfig::max_deliveries`].
    #[serde(default)]
    pub max_deliveries: Option<u32>,
}

impl ConsumerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_items: None,
            idle_backoff_ms: default_idle_backoff_ms(),
            max_deliveries: None,
        }
    }
}

fn default_idle_backoff_ms() -> u64 {
    500
}

/// External command bound to one task kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Shell command line; the task data is written to its stdin as JSON.
    pub command: String,

    /// Kill the command and treat it as failed after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl HandlerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily-rotated log files.
    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
}

impl LoggingConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.directory.to_string_lossy()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
            directory: default_log_directory(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".queuewatch")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.dispatcher.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.dispatcher.claimant, "watcher");
        assert!(config.dispatcher.max_deliveries.is_none());
        assert!(config.store.wal);
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn test_retry_backoff_is_linear() {
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 100,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_store_resolved_path_expands_tilde() {
        let store = StoreConfig::default();
        assert!(!store.resolved_path().to_string_lossy().starts_with('~'));
        assert!(store.resolved_path().ends_with(".queuewatch/queue.db"));
    }

    #[test]
    fn test_handler_timeout() {
        let mut handler = HandlerConfig::new("cat");
        assert!(handler.timeout().is_none());
        handler.timeout_secs = Some(30);
        assert_eq!(handler.timeout(), Some(Duration::from_secs(30)));
    }
}
