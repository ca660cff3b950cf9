//! Graceful shutdown.
//!
//! A signal sets [`SHUTDOWN_REQUESTED`] and broadcasts on the shutdown
//! channel. Every background loop selects on its receiver and exits at the
//! next iteration boundary. The accept loop stops taking connections, then
//! the process waits a bounded time for open connections to finish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Global shutdown flag
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Connections still being served
pub static OPEN_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[inline]
pub fn connection_opened() {
    OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn connection_closed() {
    OPEN_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
}

#[inline]
pub fn open_connections() -> u64 {
    OPEN_CONNECTIONS.load(Ordering::Relaxed)
}

/// Request shutdown from inside the process.
pub fn request_shutdown(shutdown_tx: &broadcast::Sender<()>) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    let _ = shutdown_tx.send(());
}

#[cfg(unix)]
#[allow(clippy::expect_used)] // Signal handlers are startup-critical; abort is correct on failure
pub fn install_signal_handlers(
    shutdown_tx: broadcast::Sender<()>,
) -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "herald::shutdown", "SIGTERM received, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!(target: "herald::shutdown", "SIGINT received, initiating graceful shutdown");
            }
        }

        request_shutdown(&shutdown_tx);
    }
}

#[cfg(windows)]
pub async fn install_signal_handlers(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "herald::shutdown", error = %e, "Failed to listen for Ctrl+C");
        return;
    }

    info!(target: "herald::shutdown", "Ctrl+C received, initiating graceful shutdown");
    request_shutdown(&shutdown_tx);
}

/// Wait for open connections to close.
/// Returns true if clean, false if timed out.
pub async fn drain_with_timeout(timeout: Duration) -> bool {
    info!(
        target: "herald::shutdown",
        timeout_secs = timeout.as_secs(),
        open = open_connections(),
        "Beginning drain"
    );

    let start = std::time::Instant::now();

    loop {
        let count = open_connections();
        if count == 0 {
            break;
        }

        if start.elapsed() > timeout {
            warn!(
                target: "herald::shutdown",
                open = count,
                "Drain timeout exceeded, forcing shutdown"
            );
            return false;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!(
        target: "herald::shutdown",
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Drain complete"
    );
    true
}
