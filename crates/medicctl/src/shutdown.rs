//! Ctrl-C and SIGTERM handling
//!
//! A signal cancels the shared token so in-flight device calls stop at the
//! next await point instead of the process dying mid-reboot.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Install the signal handlers and cancel `cancel` when one fires. The
/// watcher exits on its own once `cancel` is cancelled by anyone else.
pub fn cancel_on_signal(cancel: CancellationToken) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut term = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?
    };

    Ok(tokio::spawn(async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            term.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        warn!("Interrupted, cancelling device calls");
        cancel.cancel();
    }))
}
