//! Process-wide shutdown signal

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long in-flight work may run after a shutdown request
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// One-shot cancellation event carrying a grace period
///
/// Clones observe the same event. Triggering is idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Fire the signal
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested (grace period {:?})", self.grace);
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal fires
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// Fire the signal on SIGINT or SIGTERM (Ctrl+C elsewhere)
    pub fn trigger_on_os_signal(&self) -> JoinHandle<()> {
        let signal = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_os_signal() => signal.trigger(),
                _ = signal.triggered() => {}
            }
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT (Ctrl+C)");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C)"),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace() {
        let signal = ShutdownSignal::default();
        assert_eq!(signal.grace(), Duration::from_secs(1));
        assert!(!signal.is_triggered());
    }

    #[tokio::test]
    async fn test_clones_observe_trigger() {
        let signal = ShutdownSignal::with_grace(Duration::from_millis(250));
        let observer = signal.clone();

        let waiter = tokio::spawn(async move { observer.triggered().await });

        signal.trigger();
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_os_signal_task_exits_on_manual_trigger() {
        let signal = ShutdownSignal::new();
        let handle = signal.trigger_on_os_signal();

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
