//! Request Governor (C2): a priority queue fronting C1 with sliding-window
//! rate limiting, per-request retry with exponential backoff, and
//! health-aware handle selection. Grounded on the token-bucket/sliding
//! window admission pattern used for upstream rate limiting.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::engine::errors::EngineResult;
use crate::engine::index::{ClientPool, Command, Reply};
use crate::engine::observation::{Observation, ObservationSender};

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub window_size_ms: u64,
    pub max_requests_per_second: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub overflow_threshold: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        GovernorConfig {
            window_size_ms: 1000,
            max_requests_per_second: 1000,
            retry_attempts: 3,
            retry_delay_ms: 100,
            overflow_threshold: 100,
        }
    }
}

/// Sliding window admission: at most `max_requests_per_second` timestamps
/// may be recorded within any `window_size_ms` window.
struct SlidingWindow {
    timestamps: VecDeque<Instant>,
    window: Duration,
    cap: u32,
}

impl SlidingWindow {
    fn new(window: Duration, cap: u32) -> Self {
        SlidingWindow {
            timestamps: VecDeque::new(),
            window,
            cap,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `Some(wait)` if the window is saturated and the caller
    /// should wait `wait` before the next available slot; `None` if a
    /// slot is available right now (and it is claimed).
    fn try_admit(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.evict_expired(now);
        if (self.timestamps.len() as u32) < self.cap {
            self.timestamps.push_back(now);
            None
        } else {
            let oldest = *self.timestamps.front().unwrap();
            Some(self.window.saturating_sub(now.duration_since(oldest)))
        }
    }
}

struct QueueEntry {
    priority: i32,
    sequence: u64,
    notify: oneshot::Sender<()>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; lower sequence (older) first within a tier.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

pub struct RequestGovernor {
    pool: Arc<ClientPool>,
    config: GovernorConfig,
    window: Mutex<SlidingWindow>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    sequence: AtomicU64,
    observations: ObservationSender,
}

impl RequestGovernor {
    pub fn new(pool: Arc<ClientPool>, config: GovernorConfig, observations: ObservationSender) -> Self {
        let window = Mutex::new(SlidingWindow::new(
            Duration::from_millis(config.window_size_ms),
            config.max_requests_per_second,
        ));
        RequestGovernor {
            pool,
            config,
            window,
            queue: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            observations,
        }
    }

    /// Blocks until the sliding window has room, honoring priority order
    /// among concurrently waiting callers.
    async fn admit(&self, priority: i32) {
        // Fast path: nobody else is waiting, so a free slot is ours to
        // claim directly without ever touching the priority queue.
        if self.queue.lock().is_empty() && self.window.lock().try_admit().is_none() {
            return;
        }

        let (tx, rx) = oneshot::channel();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock();
            queue.push(QueueEntry {
                priority,
                sequence: seq,
                notify: tx,
            });
            let depth = queue.len();
            if depth > self.config.overflow_threshold {
                let _ = self.observations.send(Observation::QueueOverflow {
                    component: "governor",
                    depth,
                });
            }
        }

        tokio::pin!(rx);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    self.serve_queue();
                }
                res = &mut rx => {
                    if res.is_ok() {
                        return;
                    }
                }
            }
        }
    }

    /// Pops and wakes the highest-priority queued waiter(s) the sliding
    /// window currently has room for. Every waiter calls this on each of
    /// its own wake-ups, so a slot freed by the window's eviction is
    /// handed to the top of the heap rather than to whichever task
    /// happened to wake up first.
    fn serve_queue(&self) {
        loop {
            if self.queue.lock().is_empty() {
                return;
            }
            if self.window.lock().try_admit().is_some() {
                return;
            }
            if let Some(entry) = self.queue.lock().pop() {
                let _ = entry.notify.send(());
            }
        }
    }

    fn backoff_delay(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms * 2u64.pow(retry_count))
    }

    pub async fn execute_read(&self, cmd: Command, priority: i32) -> EngineResult<Reply> {
        let mut retry = 0;
        loop {
            self.admit(priority).await;
            match self.pool.execute_read(cmd.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && retry < self.config.retry_attempts => {
                    debug!(retry, error = %e, "governor retrying read");
                    tokio::time::sleep(self.backoff_delay(retry)).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn execute_write(&self, cmd: Command, priority: i32) -> EngineResult<Reply> {
        let mut retry = 0;
        loop {
            self.admit(priority).await;
            match self.pool.execute_write(cmd.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && retry < self.config.retry_attempts => {
                    debug!(retry, error = %e, "governor retrying write");
                    tokio::time::sleep(self.backoff_delay(retry)).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_window_caps_admission() {
        let mut w = SlidingWindow::new(Duration::from_millis(1000), 2);
        assert!(w.try_admit().is_none());
        assert!(w.try_admit().is_none());
        assert!(w.try_admit().is_some());
    }

    #[test]
    fn test_governor_config_defaults() {
        let cfg = GovernorConfig::default();
        assert_eq!(cfg.max_requests_per_second, 1000);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let pool = Arc::new(ClientPool::new(
            "127.0.0.1:19999".parse().unwrap(),
            vec![],
            Default::default(),
        ));
        let (tx, _rx) = crate::engine::observation::channel();
        let gov = RequestGovernor::new(pool, GovernorConfig::default(), tx);
        assert_eq!(gov.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(gov.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(gov.backoff_delay(2), Duration::from_millis(400));
    }
}
