//! Zone Manager (C4): validates, persists, retrieves, and searches
//! polygonal safety zones, with an in-memory authoritative cache. Grounded
//! on the RwLock-guarded map-of-records CRUD pattern used for DNS zone
//! management, substituting polygon/geofence semantics for zone-record
//! semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;
use uuid::Uuid;

use crate::engine::cache::{self, Cache};
use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::geo;
use crate::engine::governor::RequestGovernor;
use crate::engine::index::{Command, Field};
use crate::engine::model::{
    BoundingBox, Coordinate, Zone, ZoneDraft, ZoneStatus, ZoneType, ZoneUpdate, ZONE_MAX_AREA_M2,
    ZONE_MAX_VERTICES, ZONE_MIN_AREA_M2, ZONE_MIN_VERTICES, ZONE_NAME_MAX_LEN, ZONE_NAME_MIN_LEN,
};

lazy_static::lazy_static! {
    static ref ZONE_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9 _-]+$").unwrap();
}

fn name_pattern() -> &'static Regex {
    &ZONE_NAME_PATTERN
}

#[derive(Debug, Clone)]
pub struct ZoneManagerConfig {
    pub collection: String,
    pub cache_ttl: Duration,
}

impl Default for ZoneManagerConfig {
    fn default() -> Self {
        ZoneManagerConfig {
            collection: "zones".into(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

pub struct ZoneManager {
    zones: RwLock<HashMap<Uuid, Zone>>,
    cache: Arc<Cache>,
    governor: Arc<RequestGovernor>,
    config: ZoneManagerConfig,
}

fn validate_name(name: &str) -> EngineResult<()> {
    let len = name.chars().count();
    if !(ZONE_NAME_MIN_LEN..=ZONE_NAME_MAX_LEN).contains(&len) {
        return Err(EngineError::validation(format!(
            "zone name must be {}-{} characters",
            ZONE_NAME_MIN_LEN, ZONE_NAME_MAX_LEN
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(EngineError::validation(
            "zone name may only contain letters, digits, spaces, underscores, and hyphens",
        ));
    }
    Ok(())
}

/// Validates a coordinate ring against §3's zone invariants and returns
/// the auto-closed ring plus its derived bounding box and area.
fn validate_ring(ring: &[Coordinate]) -> EngineResult<(Vec<Coordinate>, BoundingBox, f64)> {
    for c in ring {
        c.validate()?;
    }
    let distinct = geo::polygon::distinct_vertex_count(ring);
    if distinct < ZONE_MIN_VERTICES {
        return Err(EngineError::validation(format!(
            "polygon must have at least {} distinct vertices",
            ZONE_MIN_VERTICES
        )));
    }
    if distinct > ZONE_MAX_VERTICES {
        return Err(EngineError::validation(format!(
            "polygon must have at most {} distinct vertices",
            ZONE_MAX_VERTICES
        )));
    }
    let closed = geo::auto_close(ring);
    if geo::has_self_intersection(&closed) {
        return Err(EngineError::validation("polygon is self-intersecting"));
    }
    let area = geo::area_m2(&closed);
    if !(ZONE_MIN_AREA_M2..=ZONE_MAX_AREA_M2).contains(&area) {
        return Err(EngineError::validation(format!(
            "polygon area {area} m^2 is outside the allowed range [{ZONE_MIN_AREA_M2}, {ZONE_MAX_AREA_M2}]"
        )));
    }
    let bbox = BoundingBox::from_ring(&closed);
    Ok((closed, bbox, area))
}

impl ZoneManager {
    pub fn new(governor: Arc<RequestGovernor>, cache: Arc<Cache>, config: ZoneManagerConfig) -> Self {
        ZoneManager {
            zones: RwLock::new(HashMap::new()),
            cache,
            governor,
            config,
        }
    }

    fn active_zones_excluding(&self, exclude: Option<Uuid>) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| z.status == ZoneStatus::Active && Some(z.id) != exclude)
            .cloned()
            .collect()
    }

    fn persist(&self, zone: &Zone) -> Command {
        let fields = vec![
            Field::new("name", &zone.name),
            Field::new("type", format!("{:?}", zone.zone_type)),
            Field::new("status", format!("{:?}", zone.status)),
            Field::new(
                "description",
                zone.description.clone().unwrap_or_default(),
            ),
            Field::new("riskLevel", zone.risk_level.to_string()),
            Field::new("createdBy", zone.created_by.clone().unwrap_or_default()),
            Field::new("createdAt", zone.created_at.to_rfc3339()),
            Field::new("updatedAt", zone.updated_at.to_rfc3339()),
        ];
        Command::SetObjectPolygon {
            collection: self.config.collection.clone(),
            id: zone.id.to_string(),
            fields,
            ring: zone.coordinates.clone(),
        }
    }

    pub async fn create_zone(&self, draft: ZoneDraft) -> EngineResult<Zone> {
        validate_name(&draft.name)?;
        let (ring, bbox, _area) = validate_ring(&draft.coordinates)?;

        let risk_level = draft
            .risk_level
            .unwrap_or_else(|| draft.zone_type.default_risk_level())
            .clamp(1, 10);

        for existing in self.active_zones_excluding(None) {
            if geo::polygons_overlap(&ring, &existing.coordinates) {
                return Err(EngineError::zone_overlap(format!(
                    "zone overlaps active zone {}",
                    existing.id
                )));
            }
        }

        let now = Utc::now();
        let zone = Zone {
            id: Uuid::new_v4(),
            name: draft.name,
            zone_type: draft.zone_type,
            status: ZoneStatus::Active,
            description: draft.description,
            coordinates: ring,
            bounding_box: bbox,
            risk_level,
            alert_message: draft.alert_message,
            emergency_contacts: draft.emergency_contacts,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        };

        let cmd = self.persist(&zone);
        self.governor.execute_write(cmd, 10).await?;

        self.zones.write().insert(zone.id, zone.clone());
        self.cache
            .set(cache::zone_key(&zone.id), &zone, self.config.cache_ttl);
        Ok(zone)
    }

    pub async fn update_zone(&self, id: Uuid, update: ZoneUpdate) -> EngineResult<Zone> {
        let mut current = self
            .zones
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("zone {id} not found")))?;

        if let Some(name) = &update.name {
            validate_name(name)?;
            current.name = name.clone();
        }
        if let Some(zt) = update.zone_type {
            current.zone_type = zt;
        }
        if let Some(status) = update.status {
            current.status = status;
        }
        if update.description.is_some() {
            current.description = update.description;
        }
        if let Some(coords) = update.coordinates {
            let (ring, bbox, _area) = validate_ring(&coords)?;
            for existing in self.active_zones_excluding(Some(id)) {
                if geo::polygons_overlap(&ring, &existing.coordinates) {
                    return Err(EngineError::zone_overlap(format!(
                        "zone overlaps active zone {}",
                        existing.id
                    )));
                }
            }
            current.coordinates = ring;
            current.bounding_box = bbox;
        }
        if let Some(rl) = update.risk_level {
            current.risk_level = rl.clamp(1, 10);
        }
        if update.alert_message.is_some() {
            current.alert_message = update.alert_message;
        }
        if let Some(contacts) = update.emergency_contacts {
            current.emergency_contacts = contacts;
        }
        current.updated_at = Utc::now();

        let cmd = self.persist(&current);
        self.governor.execute_write(cmd, 10).await?;

        self.zones.write().insert(id, current.clone());
        self.cache
            .set(cache::zone_key(&id), &current, self.config.cache_ttl);
        Ok(current)
    }

    /// Idempotent: deleting an already-absent zone succeeds as a no-op.
    pub async fn delete_zone(&self, id: Uuid) -> EngineResult<()> {
        if self.zones.write().remove(&id).is_none() {
            return Ok(());
        }
        let cmd = Command::Del {
            collection: self.config.collection.clone(),
            id: id.to_string(),
        };
        self.governor.execute_write(cmd, 10).await?;
        self.cache.delete(&cache::zone_key(&id));
        Ok(())
    }

    pub fn get_zone(&self, id: Uuid) -> Option<Zone> {
        if let Some(zone) = self.cache.get::<Zone>(&cache::zone_key(&id)) {
            return Some(zone);
        }
        let zone = self.zones.read().get(&id).cloned();
        if let Some(z) = &zone {
            self.cache.set(cache::zone_key(&id), z, self.config.cache_ttl);
        }
        zone
    }

    pub fn zones_containing_point(&self, point: Coordinate) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| {
                z.status == ZoneStatus::Active
                    && z.bounding_box.contains(&point)
                    && geo::point_in_polygon(point, &z.coordinates)
            })
            .cloned()
            .collect()
    }

    /// The full set of currently active zone ids, i.e. the universe
    /// [`Self::zones_containing_point`] checks against.
    pub fn active_zone_ids(&self) -> HashSet<Uuid> {
        self.zones
            .read()
            .values()
            .filter(|z| z.status == ZoneStatus::Active)
            .map(|z| z.id)
            .collect()
    }

    pub fn zones_within_bbox(&self, bbox: BoundingBox) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| {
                z.bounding_box.min_lat <= bbox.max_lat
                    && z.bounding_box.max_lat >= bbox.min_lat
                    && z.bounding_box.min_lon <= bbox.max_lon
                    && z.bounding_box.max_lon >= bbox.min_lon
            })
            .cloned()
            .collect()
    }

    pub fn zones_by_type(&self, zone_type: ZoneType) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| z.zone_type == zone_type)
            .cloned()
            .collect()
    }

    pub fn zones_by_status(&self, status: ZoneStatus) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| z.status == status)
            .cloned()
            .collect()
    }

    pub fn zones_by_risk_range(&self, min: u8, max: u8) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| z.risk_level >= min && z.risk_level <= max)
            .cloned()
            .collect()
    }

    pub fn zones_by_creator(&self, creator: &str) -> Vec<Zone> {
        self.zones
            .read()
            .values()
            .filter(|z| z.created_by.as_deref() == Some(creator))
            .cloned()
            .collect()
    }

    pub fn list_zones(&self) -> Vec<Zone> {
        self.zones.read().values().cloned().collect()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.read().len()
    }

    /// Inserts a zone directly into the in-memory map, bypassing
    /// validation and the index write. Used by other components' tests
    /// that need a seeded zone without a live spatial index connection.
    #[cfg(test)]
    pub fn create_zone_for_test(&self, zone: Zone) {
        self.zones.write().insert(zone.id, zone);
    }
}
