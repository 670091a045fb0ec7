//! OS signal wiring for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on SIGINT or SIGTERM.
#[cfg(unix)]
pub(crate) fn install(token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        info!("Shutting down after the current item");
        token.cancel();
    });
    Ok(())
}

/// Cancel `token` on Ctrl-C.
#[cfg(not(unix))]
pub(crate) fn install(token: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down after the current item");
            token.cancel();
        }
    });
    Ok(())
}
