use crate::nats::Producer;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Shutdown coordinator for producers and consume loops.
///
/// This handles:
/// - Signal reception (SIGTERM, SIGINT)
/// - Cancelling every consume loop through child tokens
/// - Joining consume tasks, then closing tracked producers
/// - Shutdown state tracking
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Root token; every consumer gets a child of it
    token: CancellationToken,
    /// Consume loops spawned through this coordinator
    tracker: TaskTracker,
    /// Producers closed once every consume loop has stopped
    producers: Arc<Mutex<Vec<Arc<dyn Producer>>>>,
    /// Flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    listener_started: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            producers: Arc::new(Mutex::new(Vec::new())),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            listener_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token cancelled when shutdown begins, or earlier by its own holder.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait until shutdown has been initiated.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Spawn a task that [`drain`](Self::drain) waits for.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Close `producer` during [`drain`](Self::drain).
    pub fn track_producer(&self, producer: Arc<dyn Producer>) {
        match self.producers.lock() {
            Ok(mut producers) => producers.push(producer),
            Err(poisoned) => poisoned.into_inner().push(producer),
        }
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Initiate shutdown and cancel every consume loop. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            self.token.cancel();
        }
    }

    /// Wait for SIGINT or SIGTERM, then initiate shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown");
            },
        }

        self.shutdown();
    }

    /// Spawn the signal listener. Only the first call spawns anything.
    pub fn listen(&self) -> Option<JoinHandle<()>> {
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            coordinator.wait_for_signal().await;
        }))
    }

    /// Shut down and wait for everything to stop.
    ///
    /// Consume loops are joined first (each unsubscribes and closes its own
    /// connection), then tracked producers are closed.
    pub async fn drain(&self) {
        self.shutdown();
        self.tracker.close();
        self.tracker.wait().await;

        let producers = match self.producers.lock() {
            Ok(mut producers) => std::mem::take(&mut *producers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for producer in producers {
            if let Err(e) = producer.close().await {
                warn!(error = %e, "Failed to close producer");
            }
        }

        info!("Event bus shutdown complete");
    }

    /// [`drain`](Self::drain), giving up after `timeout`.
    pub async fn drain_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        let result = tokio::time::timeout(timeout, self.drain()).await;
        if result.is_err() {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                pending_tasks = self.tracker.len(),
                "Shutdown timed out"
            );
        }
        result
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventBusError;
    use crate::message::SendOptions;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingProducer {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl Producer for CountingProducer {
        async fn batch_send(&self, _bodies: Vec<Bytes>, _options: SendOptions) -> Result<(), EventBusError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), EventBusError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.child_token();
        assert!(!coordinator.is_shutting_down());

        coordinator.shutdown();
        coordinator.shutdown();

        assert!(coordinator.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_token_cancels_alone() {
        let coordinator = ShutdownCoordinator::new();
        let first = coordinator.child_token();
        let second = coordinator.child_token();

        first.cancel();
        assert!(!second.is_cancelled());
        assert!(!coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks_then_closes_producers() {
        let coordinator = ShutdownCoordinator::new();
        let producer = Arc::new(CountingProducer::default());
        coordinator.track_producer(producer.clone());

        let finished = Arc::new(AtomicBool::new(false));
        let token = coordinator.child_token();
        let flag = finished.clone();
        coordinator.spawn(async move {
            token.cancelled().await;
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });

        coordinator.drain().await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(producer.closes.load(Ordering::SeqCst), 1);

        // a second drain finds nothing left to close
        coordinator.drain().await;
        assert_eq!(producer.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_with_timeout_gives_up() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.spawn(async {
            // ignores cancellation
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let result = coordinator
            .drain_with_timeout(Duration::from_secs(5))
            .await;
        assert!(result.is_err());
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_for_signal_returns_after_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();
        // already cancelled, so no signal is needed
        coordinator.wait_for_signal().await;
        coordinator.cancelled().await;
    }

    #[tokio::test]
    async fn test_listen_spawns_only_once() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        let first = coordinator.listen();
        let second = coordinator.listen();
        assert!(first.is_some());
        assert!(second.is_none());
        // a clone shares the guard
        assert!(coordinator.clone().listen().is_none());

        first.unwrap().await.unwrap();
    }
}
