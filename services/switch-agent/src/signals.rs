//! Process signal handling.
//!
//! On unix, SIGINT, SIGTERM and SIGQUIT all start the graceful shutdown.
//! Elsewhere only Ctrl-C is awaited.

use tracing::info;

/// Wait until the process is asked to terminate.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    info!(signal = name, "Received shutdown signal");
    Ok(())
}

/// Wait until the process is asked to terminate.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl_c", "Received shutdown signal");
    Ok(())
}
