use tracing::warn;

/// Resolve on Ctrl+C, or SIGTERM on Unix.
///
/// Create it once and pin it when polling from a loop; signals that arrive
/// between two freshly created futures can be missed.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler, only Ctrl+C will stop");
                None
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
