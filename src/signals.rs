//! Cooperative cancellation and OS signal wiring.
//!
//! A run is cancelled by flipping a shared token rather than by mutating
//! process-global state; the orchestrator checks the token at step
//! boundaries and lets in-flight requests finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap clonable cancellation handle.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancel the token when the process receives a termination signal.
pub fn spawn_signal_listener(token: CancelToken) {
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            tracing::warn!("🛑 Shutdown signal received, cancelling run");
            token.cancel();
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
