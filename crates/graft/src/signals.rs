//! Signal handling for the launcher.
//!
//! The host application runs on a blocking thread that cannot be interrupted,
//! so a termination signal ends the launcher without waiting for it.

use tokio::signal;
use tracing::info;

/// Returns when a termination signal is received.
///
/// # Platform Support
///
/// * **Unix platforms**: Handles SIGINT and SIGTERM signals
/// * **Windows**: Handles Ctrl+C signal
///
/// # Returns
///
/// `Ok(())` when a shutdown signal is received, or an error if signal
/// handling setup failed.
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}
