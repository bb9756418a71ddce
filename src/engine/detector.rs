//! Geofence Event Detector (C7): a periodic sweeper plus an on-demand
//! path, both built on one shared membership-diff so periodic sweeps and
//! synchronous single-point checks never disagree about a user's current
//! zone membership.
//!
//! Resolves the open question in the distilled spec: `eventType` is never
//! hard-coded to `inside`. A per-user membership set is diffed every time
//! a user's zone containment is recomputed, producing `enter` on first
//! sighting inside a zone, `inside` on repeat sightings, and `exit` when a
//! previously-membered zone no longer contains the user.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::errors::EngineResult;
use crate::engine::location::LocationIndexer;
use crate::engine::model::{Coordinate, GeofenceEvent, GeofenceEventType, Zone};
use crate::engine::zones::ZoneManager;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub check_interval: Duration,
    pub batch_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            check_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

/// An event paired with the zone it fired against, looked up at emission
/// time so the webhook dispatcher can build a full payload envelope
/// without needing its own handle onto the zone manager. `None` if the
/// zone was deleted between the diff and this lookup.
pub type GeofenceEventSender = mpsc::UnboundedSender<(GeofenceEvent, Option<Zone>)>;
pub type GeofenceEventReceiver = mpsc::UnboundedReceiver<(GeofenceEvent, Option<Zone>)>;

pub fn event_channel() -> (GeofenceEventSender, GeofenceEventReceiver) {
    mpsc::unbounded_channel()
}

pub struct GeofenceDetector {
    zones: Arc<ZoneManager>,
    location_indexer: Arc<LocationIndexer>,
    config: DetectorConfig,
    /// userId -> set of zoneIds the user is currently membered in.
    membership: RwLock<HashMap<String, HashSet<Uuid>>>,
    events_tx: GeofenceEventSender,
    next_zone_cursor: RwLock<usize>,
}

impl GeofenceDetector {
    pub fn new(
        zones: Arc<ZoneManager>,
        location_indexer: Arc<LocationIndexer>,
        config: DetectorConfig,
        events_tx: GeofenceEventSender,
    ) -> Self {
        GeofenceDetector {
            zones,
            location_indexer,
            config,
            membership: RwLock::new(HashMap::new()),
            events_tx,
            next_zone_cursor: RwLock::new(0),
        }
    }

    /// Diffs `now_membered` against the stored membership set for
    /// `user_id`, restricted to the zones actually swept this call
    /// (`swept_zone_ids`), producing one event per zone whose state
    /// changed and one `inside` event per zone that stayed membered.
    /// Zones the user was previously membered in but that weren't part of
    /// this sweep are carried forward untouched rather than dropped, so a
    /// partial sweep (§4.7's batched periodic tick) never manufactures a
    /// spurious `exit` for a zone it never actually checked.
    fn diff_and_commit(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        now_membered: &HashMap<Uuid, Zone>,
        swept_zone_ids: &HashSet<Uuid>,
        source: &'static str,
    ) -> Vec<GeofenceEvent> {
        let mut membership = self.membership.write();
        let previous = membership.remove(user_id).unwrap_or_default();

        let mut events = Vec::new();
        for (zone_id, zone) in now_membered {
            let event_type = if previous.contains(zone_id) {
                GeofenceEventType::Inside
            } else {
                GeofenceEventType::Enter
            };
            events.push(GeofenceEvent::new(
                user_id.to_string(),
                zone,
                event_type,
                coordinate,
                source,
            ));
        }

        let mut carried_forward = HashSet::new();
        for zone_id in previous.iter() {
            if !swept_zone_ids.contains(zone_id) {
                carried_forward.insert(*zone_id);
                continue;
            }
            if !now_membered.contains_key(zone_id) {
                if let Some(zone) = self.zones.get_zone(*zone_id) {
                    events.push(GeofenceEvent::new(
                        user_id.to_string(),
                        &zone,
                        GeofenceEventType::Exit,
                        coordinate,
                        source,
                    ));
                }
            }
        }

        let mut committed: HashSet<Uuid> = now_membered.keys().copied().collect();
        committed.extend(carried_forward);
        membership.insert(user_id.to_string(), committed);
        events
    }

    fn emit(&self, events: &[GeofenceEvent]) {
        for event in events {
            let zone = self.zones.get_zone(event.zone_id);
            let _ = self.events_tx.send((event.clone(), zone));
        }
    }

    /// On-demand path: checks a single user's current point against all
    /// active zones (in-memory, no index round trip) and emits the
    /// resulting diffed events.
    pub fn process_point(&self, user_id: &str, coordinate: Coordinate) -> Vec<GeofenceEvent> {
        // The on-demand path always checks against every active zone, so
        // the swept universe is simply all of them.
        let swept_zone_ids = self.zones.active_zone_ids();
        let containing = self.zones.zones_containing_point(coordinate);
        let now_membered: HashMap<Uuid, Zone> =
            containing.into_iter().map(|z| (z.id, z)).collect();
        let events = self.diff_and_commit(user_id, coordinate, &now_membered, &swept_zone_ids, "on_demand");
        self.emit(&events);
        events
    }

    /// One periodic sweep tick: pulls up to `batch_size` active zones
    /// (round-robin cursor across calls so every zone eventually gets
    /// swept even when there are more active zones than the batch size),
    /// asks the index which users are within each zone, and diffs
    /// membership per (zone, user) pair encountered this tick.
    pub async fn tick(&self) -> EngineResult<usize> {
        let all_active: Vec<Zone> = self
            .zones
            .list_zones()
            .into_iter()
            .filter(|z| z.status == crate::engine::model::ZoneStatus::Active)
            .collect();
        if all_active.is_empty() {
            return Ok(0);
        }

        let start = {
            let mut cursor = self.next_zone_cursor.write();
            let start = *cursor % all_active.len();
            *cursor = (start + self.config.batch_size) % all_active.len().max(1);
            start
        };
        let batch: Vec<&Zone> = all_active
            .iter()
            .cycle()
            .skip(start)
            .take(self.config.batch_size.min(all_active.len()))
            .collect();

        let swept_zone_ids: HashSet<Uuid> = batch.iter().map(|z| z.id).collect();

        // user_id -> zones (this tick) they are inside, restricted to the
        // zones swept this tick so we only diff what we actually checked.
        let mut per_user: HashMap<String, HashMap<Uuid, Zone>> = HashMap::new();
        let mut per_user_coord: HashMap<String, Coordinate> = HashMap::new();

        for zone in &batch {
            let within = self
                .location_indexer
                .find_within_polygon(&zone.coordinates, None)
                .await?;
            for hit in within {
                per_user
                    .entry(hit.user_id.clone())
                    .or_default()
                    .insert(zone.id, (*zone).clone());
                per_user_coord.insert(hit.user_id, hit.coordinate);
            }
        }

        // A user already membered in a zone swept this tick who produced
        // no hit for it needs diffing too, or a real exit from that zone
        // would never be detected.
        {
            let membership = self.membership.read();
            for (user_id, zones) in membership.iter() {
                if per_user.contains_key(user_id) {
                    continue;
                }
                if zones.iter().any(|z| swept_zone_ids.contains(z)) {
                    per_user.entry(user_id.clone()).or_default();
                }
            }
        }

        let mut total = 0;
        for (user_id, zones_now) in per_user {
            let coordinate = per_user_coord
                .get(&user_id)
                .copied()
                .unwrap_or(Coordinate::new(0.0, 0.0));
            let events = self.diff_and_commit(&user_id, coordinate, &zones_now, &swept_zone_ids, "periodic_sweep");
            total += events.len();
            self.emit(&events);
        }
        Ok(total)
    }

    pub fn membership_count(&self) -> usize {
        self.membership.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::Cache;
    use crate::engine::governor::{GovernorConfig, RequestGovernor};
    use crate::engine::index::ClientPool;
    use crate::engine::location::LocationIndexerConfig;
    use crate::engine::model::{Zone, ZoneStatus, ZoneType};
    use crate::engine::zones::ZoneManagerConfig;
    use chrono::Utc;

    fn make_detector() -> (GeofenceDetector, GeofenceEventReceiver) {
        let pool = Arc::new(ClientPool::new(
            "127.0.0.1:19999".parse().unwrap(),
            vec![],
            Default::default(),
        ));
        let (obs_tx, _obs_rx) = crate::engine::observation::channel();
        let governor = Arc::new(RequestGovernor::new(pool, GovernorConfig::default(), obs_tx.clone()));
        let cache = Arc::new(Cache::new());
        let zones = Arc::new(ZoneManager::new(
            governor.clone(),
            cache.clone(),
            ZoneManagerConfig::default(),
        ));
        let location_indexer = Arc::new(LocationIndexer::new(
            governor,
            cache,
            LocationIndexerConfig::default(),
            obs_tx,
        ));
        let (events_tx, events_rx) = event_channel();
        (
            GeofenceDetector::new(zones, location_indexer, DetectorConfig::default(), events_tx),
            events_rx,
        )
    }

    fn test_zone(id: Uuid) -> Zone {
        let ring = vec![
            Coordinate::new(28.6139, 77.2090),
            Coordinate::new(28.6139, 77.2100),
            Coordinate::new(28.6149, 77.2100),
            Coordinate::new(28.6149, 77.2090),
        ];
        Zone {
            id,
            name: "Test Zone".into(),
            zone_type: ZoneType::Safe,
            status: ZoneStatus::Active,
            description: None,
            bounding_box: crate::engine::model::BoundingBox::from_ring(&ring),
            coordinates: ring,
            risk_level: 2,
            alert_message: None,
            emergency_contacts: vec![],
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_enter_then_inside_then_exit() {
        let (detector, mut rx) = make_detector();
        let zone = test_zone(Uuid::new_v4());
        detector.zones.create_zone_for_test(zone.clone());

        let inside_point = Coordinate::new(28.6144, 77.2095);
        let events = detector.process_point("U1", inside_point);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, GeofenceEventType::Enter);
        rx.try_recv().unwrap();

        let events = detector.process_point("U1", inside_point);
        assert_eq!(events[0].event_type, GeofenceEventType::Inside);
        rx.try_recv().unwrap();

        let outside_point = Coordinate::new(0.0, 0.0);
        let events = detector.process_point("U1", outside_point);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, GeofenceEventType::Exit);
    }
}
