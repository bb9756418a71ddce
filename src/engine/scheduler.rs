//! Scheduler: the single place named background tasks are spawned and
//! coordinated against one shutdown broadcast, per the redesign note
//! replacing independent ad-hoc intervals. Grounded on the teacher's
//! `dns/shutdown.rs::ShutdownCoordinator` broadcast pattern.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Scheduler {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawns a named task that runs `tick` on `interval`, stopping as
    /// soon as the shutdown signal fires (including mid-sleep).
    pub fn spawn_interval<F, Fut>(&mut self, name: &'static str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "tick");
                        tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!(task = name, "stopping on shutdown");
                        break;
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Registers a task spawned outside `spawn_interval` (e.g. a channel
    /// forwarding loop built around its own `subscribe()`d receiver) so
    /// `shutdown` still joins it.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Broadcasts shutdown and waits for every spawned task to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduled task panicked during shutdown");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a scheduler so `Arc<Mutex<Scheduler>>`-free call sites can share
/// shutdown fan-out without owning the task handles.
pub type SharedShutdown = Arc<broadcast::Sender<()>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_interval_task_ticks_and_stops() {
        let mut scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        scheduler.spawn_interval("test-task", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await;
        assert!(counter.load(Ordering::Relaxed) >= 1);
    }
}
