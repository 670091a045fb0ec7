//! Task handlers backed by external commands.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use queuewatch_config::HandlerConfig;
use queuewatch_queue::{HandlerRegistry, QueueError, TaskHandler};

/// Environment variable carrying the task kind to the command.
pub(crate) const TASK_KIND_ENV: &str = "QUEUEWATCH_TASK_KIND";

/// Runs a shell command per task, writing the task data to its stdin as JSON.
///
/// Exit status 0 is success. Any other status, a spawn failure or a timeout
/// fails the task, which the dispatcher then requeues.
pub(crate) struct CommandHandler {
    kind: String,
    config: HandlerConfig,
}

impl CommandHandler {
    pub(crate) fn new(kind: impl Into<String>, config: HandlerConfig) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    async fn handle(&self, data: &Value) -> Result<(), QueueError> {
        let input = serde_json::to_vec(data)?;

        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(&self.config.command)
            .env(TASK_KIND_ENV, &self.kind)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            QueueError::ExecutionFailed(format!("failed to start `{}`: {}", self.config.command, e))
        })?;

        // Feed stdin while collecting output so a command that echoes large
        // input cannot fill its stdout pipe and stall.
        let stdin = child.stdin.take();
        let exchange = async move {
            let write = async move {
                let Some(mut stdin) = stdin else {
                    return Ok(());
                };
                match stdin.write_all(&input).await {
                    // Commands that ignore their input may exit before reading it.
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                }
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            written.and(output)
        };

        let output = match self.config.timeout() {
            Some(limit) => timeout(limit, exchange).await.map_err(|_| {
                QueueError::ExecutionFailed(format!(
                    "`{}` timed out after {}s",
                    self.config.command,
                    limit.as_secs()
                ))
            })?,
            None => exchange.await,
        }
        .map_err(|e| QueueError::ExecutionFailed(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(kind = %self.kind, "Handler output: {}", stdout.trim());
        }

        if output.status.success() {
            Ok(())
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(QueueError::ExecutionFailed(format!(
                "Command failed with exit code {}: {}",
                code,
                stderr.trim()
            )))
        }
    }
}

/// Build the routing table from `[handlers.<kind>]` sections.
pub(crate) fn build_registry(
    handlers: &BTreeMap<String, HandlerConfig>,
) -> Result<HandlerRegistry, QueueError> {
    let mut registry = HandlerRegistry::new();
    for (kind, config) in handlers {
        registry.register(kind.clone(), Arc::new(CommandHandler::new(kind, config.clone())))?;
    }
    Ok(registry)
}
