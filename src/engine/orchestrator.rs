//! Orchestrator (C9): wires C1 through C8 behind one operation surface,
//! owns the scheduler, and aggregates health. Constructed exclusively
//! through [`Builder`], per the redesign note replacing "wait for ready"
//! callbacks with a synchronous lifecycle — `Builder::build()` either
//! fully succeeds or returns an error, never a half-wired instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::engine::bulk::{BulkProcessor, BulkStats};
use crate::engine::cache::Cache;
use crate::engine::config::Settings;
use crate::engine::detector::{event_channel, GeofenceDetector};
use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::geo;
use crate::engine::governor::RequestGovernor;
use crate::engine::health::{self, HealthStatus};
use crate::engine::index::ClientPool;
use crate::engine::location::{LocationIndexer, NearbyResult};
use crate::engine::model::{
    Coordinate, GeofenceEvent, LocationInput, Zone, ZoneDraft, ZoneStatus, ZoneType, ZoneUpdate,
};
use crate::engine::observation::{self, Observation};
use crate::engine::scheduler::Scheduler;
use crate::engine::webhooks::{WebhookDispatcher, WebhookStats};
use crate::engine::zones::ZoneManager;

pub struct Orchestrator {
    settings: Settings,
    pool: Arc<ClientPool>,
    governor: Arc<RequestGovernor>,
    cache: Arc<Cache>,
    zones: Arc<ZoneManager>,
    location: Arc<LocationIndexer>,
    detector: Arc<GeofenceDetector>,
    bulk: Arc<BulkProcessor>,
    webhooks: Arc<WebhookDispatcher>,
    scheduler: Option<Scheduler>,
    shut_down: AtomicBool,
}

impl Orchestrator {
    fn guard(&self) -> EngineResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::not_initialized("orchestrator has been shut down"));
        }
        Ok(())
    }

    /// Synchronous path: validate + stamp, write through C5, check C4
    /// intersections via C7, and hand resulting events straight to C8.
    pub async fn update_location(&self, input: LocationInput) -> EngineResult<Vec<GeofenceEvent>> {
        self.guard()?;
        let update = input.into_update();
        update.validate()?;
        self.location.update_location(update.clone()).await?;
        // `process_point` emits onto the detector's event channel, which the
        // orchestrator's own forwarding task drains into C8; dispatch is
        // owned entirely by that one path so events are never double-queued.
        let events = self.detector.process_point(&update.user_id, update.coordinate);
        for event in &events {
            crate::engine::metrics::record_event(&format!("{:?}", event.event_type).to_lowercase());
        }
        crate::engine::metrics::record_location_success();
        Ok(events)
    }

    /// Asynchronous path: enqueues for C6's batch pipeline.
    pub fn queue_location_update(&self, input: LocationInput) -> EngineResult<()> {
        self.guard()?;
        self.bulk.enqueue(input);
        Ok(())
    }

    pub fn process_bulk_locations(&self, inputs: Vec<LocationInput>) -> EngineResult<()> {
        self.guard()?;
        self.bulk.enqueue_many(inputs);
        Ok(())
    }

    pub async fn get_user_location(
        &self,
        user_id: &str,
    ) -> EngineResult<Option<crate::engine::model::LocationUpdate>> {
        self.guard()?;
        self.location.get_current_location(user_id).await
    }

    pub async fn find_nearby_users(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: Option<u32>,
    ) -> EngineResult<Vec<NearbyResult>> {
        self.guard()?;
        self.location.find_nearby(center, radius_m, limit).await
    }

    pub async fn find_users_in_zone(&self, zone_id: Uuid) -> EngineResult<Vec<NearbyResult>> {
        self.guard()?;
        let zone = self
            .zones
            .get_zone(zone_id)
            .ok_or_else(|| EngineError::validation(format!("zone {zone_id} not found")))?;
        self.location.find_within_polygon(&zone.coordinates, None).await
    }

    pub async fn create_zone(&self, draft: ZoneDraft) -> EngineResult<Zone> {
        self.guard()?;
        self.zones.create_zone(draft).await
    }

    pub async fn update_zone(&self, id: Uuid, update: ZoneUpdate) -> EngineResult<Zone> {
        self.guard()?;
        self.zones.update_zone(id, update).await
    }

    /// Removes the zone and invalidates its cache entry and any cached
    /// nearby-query results that might reference it.
    pub async fn delete_zone(&self, id: Uuid) -> EngineResult<()> {
        self.guard()?;
        self.zones.delete_zone(id).await?;
        self.cache.delete_prefix("nearby:");
        Ok(())
    }

    pub fn get_zone(&self, id: Uuid) -> Option<Zone> {
        self.zones.get_zone(id)
    }

    pub fn zones_by_type(&self, zone_type: ZoneType) -> Vec<Zone> {
        self.zones.zones_by_type(zone_type)
    }

    pub fn zones_by_status(&self, status: ZoneStatus) -> Vec<Zone> {
        self.zones.zones_by_status(status)
    }

    pub fn calculate_distance(&self, a: Coordinate, b: Coordinate, alg: geo::DistanceAlgorithm) -> f64 {
        geo::distance_m(a, b, alg)
    }

    pub fn calculate_distance_matrix(&self, points: &[Coordinate], alg: geo::DistanceAlgorithm) -> Vec<Vec<f64>> {
        geo::distance_matrix_m(points, alg)
    }

    pub fn calculate_nearest(
        &self,
        from: Coordinate,
        candidates: &[Coordinate],
        alg: geo::DistanceAlgorithm,
    ) -> Option<(usize, f64)> {
        geo::nearest_point(from, candidates, alg)
    }

    pub async fn register_webhook(
        &self,
        draft: crate::engine::model::WebhookDraft,
    ) -> EngineResult<crate::engine::model::WebhookConfig> {
        self.guard()?;
        self.webhooks.register_webhook(draft).await
    }

    pub fn remove_webhook(&self, id: Uuid) {
        self.webhooks.remove_webhook(id);
    }

    pub fn get_webhook_statistics(&self, id: Uuid) -> Option<WebhookStats> {
        self.webhooks.get_webhook_statistics(id)
    }

    pub fn bulk_stats(&self) -> BulkStats {
        self.bulk.stats()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        let records = self.pool.statistics();
        let primary_connected = records
            .iter()
            .find(|r| r.role == crate::engine::model::ConnectionRole::Primary)
            .map(|r| r.connected)
            .unwrap_or(false);
        let total_replica_count = records
            .iter()
            .filter(|r| r.role == crate::engine::model::ConnectionRole::Replica)
            .count();
        let healthy_replica_count = records
            .iter()
            .filter(|r| r.role == crate::engine::model::ConnectionRole::Replica && r.connected)
            .count();
        let bulk_stats = self.bulk.stats();
        let recent_failure_rate = if bulk_stats.total_processed > 0 {
            bulk_stats.error_count as f64 / bulk_stats.total_processed as f64
        } else {
            0.0
        };

        health::classify(&health::HealthInputs {
            primary_connected,
            healthy_replica_count,
            total_replica_count,
            governor_queue_depth: self.governor.queue_depth(),
            bulk_queue_depth: self.bulk.queue_size(),
            webhook_queue_depth: self.webhooks.queue_depth(),
            recent_failure_rate,
        })
    }

    /// Signals every scheduled task to stop and joins them.
    pub async fn shutdown(mut self) {
        self.shut_down.store(true, Ordering::Release);
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        info!("orchestrator shut down");
    }
}

/// Builds an [`Orchestrator`] from [`Settings`]: connects C1, wires C2
/// through C8, spawns the named scheduled tasks, and waits for the
/// primary connection to come up before returning.
pub struct Builder {
    settings: Settings,
}

impl Builder {
    pub fn new(settings: Settings) -> Self {
        Builder { settings }
    }

    pub async fn build(self) -> EngineResult<Orchestrator> {
        let settings = self.settings;

        let pool = Arc::new(ClientPool::new(
            settings.primary_addr,
            settings.replica_addrs.clone(),
            settings.pool.clone(),
        ));

        tokio::time::timeout(settings.connection_ready_wait, pool.connect_all())
            .await
            .map_err(|_| EngineError::primary_unavailable("timed out waiting for spatial index connection"))??;

        let (obs_tx, mut obs_rx) = observation::channel();

        let governor = Arc::new(RequestGovernor::new(
            pool.clone(),
            settings.governor.clone(),
            obs_tx.clone(),
        ));
        let cache = Arc::new(Cache::new());
        let zones = Arc::new(ZoneManager::new(governor.clone(), cache.clone(), settings.zones.clone()));
        let location = Arc::new(LocationIndexer::new(
            governor.clone(),
            cache.clone(),
            settings.location.clone(),
            obs_tx.clone(),
        ));

        let (events_tx, mut events_rx) = event_channel();
        let detector = Arc::new(GeofenceDetector::new(
            zones.clone(),
            location.clone(),
            settings.detector.clone(),
            events_tx,
        ));
        let bulk = Arc::new(BulkProcessor::new(
            location.clone(),
            detector.clone(),
            settings.bulk.clone(),
            obs_tx.clone(),
        ));
        let webhooks = Arc::new(WebhookDispatcher::new(settings.webhooks.clone(), obs_tx.clone()));

        let mut scheduler = Scheduler::new();

        scheduler.spawn_interval("location-flush", settings.location.flush_interval, {
            let location = location.clone();
            move || {
                let location = location.clone();
                async move {
                    if let Err(e) = location.flush().await {
                        tracing::warn!(error = %e, "scheduled location flush failed");
                    }
                }
            }
        });

        scheduler.spawn_interval("bulk-drain", settings.bulk.batch_interval, {
            let bulk = bulk.clone();
            move || {
                let bulk = bulk.clone();
                async move {
                    bulk.drain_batch().await;
                }
            }
        });

        scheduler.spawn_interval("detector-sweep", settings.detector.check_interval, {
            let detector = detector.clone();
            move || {
                let detector = detector.clone();
                async move {
                    if let Err(e) = detector.tick().await {
                        tracing::warn!(error = %e, "scheduled geofence sweep failed");
                    }
                }
            }
        });

        scheduler.spawn_interval("webhook-drain", settings.webhooks.drain_interval, {
            let webhooks = webhooks.clone();
            move || {
                let webhooks = webhooks.clone();
                async move {
                    webhooks.drain().await;
                }
            }
        });

        scheduler.spawn_interval("health-probe", settings.pool.health_probe_interval, {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                async move {
                    pool.health_probe_tick().await;
                }
            }
        });

        // Event-channel forwarding: C7's diffed events to C8's matcher/queue.
        let mut events_shutdown = scheduler.subscribe();
        let webhooks_for_events = webhooks.clone();
        let events_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some((event, zone)) = events_rx.recv() => {
                        webhooks_for_events.enqueue_event(event, zone);
                    }
                    _ = events_shutdown.recv() => break,
                }
            }
        });
        scheduler.track(events_handle);

        // Observation forwarding: logs + metrics, one place per the
        // redesign note's typed observer channels.
        let mut obs_shutdown = scheduler.subscribe();
        let obs_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(obs) = obs_rx.recv() => {
                        observation::log_observation(&obs);
                        crate::engine::metrics::record_observation(&obs);
                    }
                    _ = obs_shutdown.recv() => break,
                }
            }
        });
        scheduler.track(obs_handle);

        Ok(Orchestrator {
            settings,
            pool,
            governor,
            cache,
            zones,
            location,
            detector,
            bulk,
            webhooks,
            scheduler: Some(scheduler),
            shut_down: AtomicBool::new(false),
        })
    }
}
