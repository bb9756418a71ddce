//! Bulk Location Processor (C6): an unbounded intake queue drained in
//! size- or time-triggered batches, each batch split into concurrent
//! chunks. Grounded on the same worker-pool-over-a-shared-queue shape as
//! the request governor's admission queue, scaled up to whole batches of
//! work instead of single requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::engine::detector::GeofenceDetector;
use crate::engine::errors::EngineResult;
use crate::engine::location::LocationIndexer;
use crate::engine::model::{LocationInput, LocationUpdate};
use crate::engine::observation::{Observation, ObservationSender};

#[derive(Debug, Clone)]
pub struct BulkProcessorConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub concurrency: usize,
    pub max_retries: u32,
    pub overflow_threshold: usize,
}

impl Default for BulkProcessorConfig {
    fn default() -> Self {
        BulkProcessorConfig {
            batch_size: 100,
            batch_interval: Duration::from_secs(1),
            concurrency: 5,
            max_retries: 3,
            overflow_threshold: 1000,
        }
    }
}

struct QueuedLocation {
    update: LocationUpdate,
    retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BulkStats {
    pub total_processed: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_processing_time_ms: f64,
    pub queue_size: usize,
    pub throughput_per_second: f64,
}

struct ThroughputWindow {
    samples: VecDeque<Instant>,
    window: Duration,
}

impl ThroughputWindow {
    fn new(window: Duration) -> Self {
        ThroughputWindow {
            samples: VecDeque::new(),
            window,
        }
    }

    fn record(&mut self, now: Instant, n: usize) {
        for _ in 0..n {
            self.samples.push_back(now);
        }
        while let Some(&front) = self.samples.front() {
            if now.duration_since(front) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn rate(&self) -> f64 {
        self.samples.len() as f64 / self.window.as_secs_f64()
    }
}

pub struct BulkProcessor {
    location_indexer: Arc<LocationIndexer>,
    detector: Arc<GeofenceDetector>,
    config: BulkProcessorConfig,
    observations: ObservationSender,
    queue: Mutex<VecDeque<QueuedLocation>>,
    processing_times_ms: Mutex<VecDeque<f64>>,
    throughput: Mutex<ThroughputWindow>,
    total_processed: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
}

impl BulkProcessor {
    pub fn new(
        location_indexer: Arc<LocationIndexer>,
        detector: Arc<GeofenceDetector>,
        config: BulkProcessorConfig,
        observations: ObservationSender,
    ) -> Self {
        BulkProcessor {
            location_indexer,
            detector,
            throughput: Mutex::new(ThroughputWindow::new(Duration::from_secs(5))),
            config,
            observations,
            queue: Mutex::new(VecDeque::new()),
            processing_times_ms: Mutex::new(VecDeque::new()),
            total_processed: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Enqueues one location for later batch processing.
    pub fn enqueue(&self, input: LocationInput) {
        self.enqueue_update(input.into_update());
    }

    /// Enqueues a whole array of locations in one call, per §4.6's "accepts
    /// both single enqueues and arrays of batches".
    pub fn enqueue_many(&self, inputs: Vec<LocationInput>) {
        for input in inputs {
            self.enqueue(input);
        }
    }

    fn enqueue_update(&self, update: LocationUpdate) {
        let mut queue = self.queue.lock();
        queue.push_back(QueuedLocation { update, retries: 0 });
        if queue.len() >= self.config.overflow_threshold {
            let _ = self.observations.send(Observation::QueueOverflow {
                component: "bulk_processor",
                depth: queue.len(),
            });
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    /// True once the queue has reached the size trigger; the scheduler
    /// also calls `drain_batch` unconditionally on the time trigger.
    pub fn should_drain(&self) -> bool {
        self.queue.lock().len() >= self.config.batch_size
    }

    /// Pulls up to `batch_size` entries off the queue and processes them
    /// in `concurrency` concurrent chunks. Returns the number processed.
    pub async fn drain_batch(&self) -> usize {
        let batch: Vec<QueuedLocation> = {
            let mut queue = self.queue.lock();
            let n = self.config.batch_size.min(queue.len());
            queue.drain(..n).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let chunk_count = self.config.concurrency.max(1);
        let chunk_size = (batch.len() + chunk_count - 1) / chunk_count;
        let mut to_retry = Vec::new();

        let chunks: Vec<Vec<QueuedLocation>> = batch
            .into_iter()
            .fold(Vec::new(), |mut acc: Vec<Vec<QueuedLocation>>, item| {
                if acc.last().map(|c| c.len()).unwrap_or(chunk_size) >= chunk_size {
                    acc.push(Vec::new());
                }
                acc.last_mut().unwrap().push(item);
                acc
            });

        let results = futures::future::join_all(
            chunks.into_iter().map(|chunk| self.process_chunk(chunk)),
        )
        .await;

        let mut processed = 0;
        for chunk_retry in results {
            processed += chunk_retry.processed;
            to_retry.extend(chunk_retry.retry);
        }

        if !to_retry.is_empty() {
            let mut queue = self.queue.lock();
            for item in to_retry.into_iter().rev() {
                queue.push_front(item);
            }
        }

        processed
    }

    async fn process_chunk(&self, chunk: Vec<QueuedLocation>) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        for mut item in chunk {
            let started = Instant::now();
            let result = self.process_one(&item.update).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            self.total_processed.fetch_add(1, Ordering::Relaxed);
            self.record_processing_time(elapsed_ms);
            self.throughput.lock().record(Instant::now(), 1);

            match result {
                Ok(()) => {
                    self.success_count.fetch_add(1, Ordering::Relaxed);
                    outcome.processed += 1;
                }
                Err(err) => {
                    item.retries += 1;
                    if item.retries > self.config.max_retries {
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                        let _ = self.observations.send(Observation::LocationFailed {
                            user_id: item.update.user_id.clone(),
                            reason: err.message.clone(),
                        });
                    } else {
                        warn!(
                            user_id = %item.update.user_id,
                            retries = item.retries,
                            error = %err,
                            "requeueing location after processing failure"
                        );
                        outcome.retry.push(item);
                    }
                }
            }
        }
        outcome
    }

    async fn process_one(&self, update: &LocationUpdate) -> EngineResult<()> {
        self.location_indexer.update_location(update.clone()).await?;
        // `process_point` already emits onto the detector's event channel;
        // nothing further to forward here.
        self.detector.process_point(&update.user_id, update.coordinate);
        Ok(())
    }

    fn record_processing_time(&self, elapsed_ms: f64) {
        let mut samples = self.processing_times_ms.lock();
        samples.push_back(elapsed_ms);
        if samples.len() > 1000 {
            samples.pop_front();
        }
    }

    pub fn stats(&self) -> BulkStats {
        let samples = self.processing_times_ms.lock();
        let average_processing_time_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };
        BulkStats {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            average_processing_time_ms,
            queue_size: self.queue_size(),
            throughput_per_second: self.throughput.lock().rate(),
        }
    }
}

#[derive(Default)]
struct ChunkOutcome {
    processed: usize,
    retry: Vec<QueuedLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_config_defaults() {
        let cfg = BulkProcessorConfig::default();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn test_throughput_window_evicts_old_samples() {
        let mut window = ThroughputWindow::new(Duration::from_millis(10));
        let t0 = Instant::now();
        window.record(t0, 5);
        assert_eq!(window.rate(), 5.0 / 0.01);
        std::thread::sleep(Duration::from_millis(20));
        window.record(Instant::now(), 0);
        assert_eq!(window.samples.len(), 0);
    }
}
