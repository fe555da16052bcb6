use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT
    Signal,
    /// A serving task ended or failed
    TaskExited,
    /// The shutdown channel closed without a reason
    Force,
}

/// Broadcasts a single shutdown request to every task that subscribed.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Request shutdown. Only the first request is broadcast.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown triggered: {:?}", reason);
            // No receivers just means nothing is listening yet.
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM and broadcast shutdown.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for SIGINT: {}", e);
                    std::future::pending::<()>().await;
                }
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        self.trigger_shutdown(ShutdownReason::Signal);
    }

    /// Create a shutdown token that can be moved into a task
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C exists here
    std::future::pending::<()>().await;
}

/// A token that can be moved into a task to wait for shutdown
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
        }
    }
}

impl ShutdownToken {
    /// Wait for a shutdown request
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Force,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_manual_trigger_shutdown() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::TaskExited);
        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::TaskExited);
    }

    #[tokio::test]
    async fn test_only_first_trigger_is_broadcast() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Signal);
        shutdown.trigger_shutdown(ShutdownReason::TaskExited);

        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::Signal);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_token_wakes_waiting_task() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();

        let waiter = tokio::spawn(async move { token.wait_for_shutdown().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger_shutdown(ShutdownReason::Signal);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Signal);
    }

    #[tokio::test]
    async fn test_cloned_token_sees_shutdown() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.shutdown_token();
        let mut cloned = token.clone();

        shutdown.trigger_shutdown(ShutdownReason::TaskExited);
        let reason = tokio::time::timeout(Duration::from_secs(1), cloned.wait_for_shutdown())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::TaskExited);
    }
}
