//! Shared data model: coordinates, zones, location updates, geofence
//! events, and webhook configuration — the wire-and-storage shapes every
//! component exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::engine::errors::EngineError;

/// A geographic point, `(latitude, longitude)` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(EngineError::validation(format!(
                "latitude {} out of range [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(EngineError::validation(format!(
                "longitude {} out of range [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }

    /// Cache-key quantization: 6 decimal places.
    pub fn quantized(&self) -> (i64, i64) {
        (
            (self.lat * 1_000_000.0).round() as i64,
            (self.lon * 1_000_000.0).round() as i64,
        )
    }
}

/// Axis-aligned bounding box derived from a polygon ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn from_ring(ring: &[Coordinate]) -> Self {
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for c in ring {
            min_lat = min_lat.min(c.lat);
            max_lat = max_lat.max(c.lat);
            min_lon = min_lon.min(c.lon);
            max_lon = max_lon.max(c.lon);
        }
        BoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        c.lat >= self.min_lat && c.lat <= self.max_lat && c.lon >= self.min_lon && c.lon <= self.max_lon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Safe,
    Caution,
    Restricted,
    HighRisk,
    Emergency,
    TouristFriendly,
}

impl ZoneType {
    /// Default risk level by type, per the risk-level table.
    pub fn default_risk_level(&self) -> u8 {
        match self {
            ZoneType::Safe => 2,
            ZoneType::TouristFriendly => 3,
            ZoneType::Caution => 5,
            ZoneType::Restricted => 7,
            ZoneType::HighRisk => 9,
            ZoneType::Emergency => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Active,
    Inactive,
    Maintenance,
}

/// A persistent polygonal safety region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    pub zone_type: ZoneType,
    pub status: ZoneStatus,
    pub description: Option<String>,
    pub coordinates: Vec<Coordinate>,
    pub bounding_box: BoundingBox,
    pub risk_level: u8,
    pub alert_message: Option<String>,
    pub emergency_contacts: Vec<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Draft fields accepted by `createZone`, prior to validation/normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDraft {
    pub name: String,
    pub zone_type: ZoneType,
    pub description: Option<String>,
    pub coordinates: Vec<Coordinate>,
    pub risk_level: Option<u8>,
    pub alert_message: Option<String>,
    pub emergency_contacts: Vec<String>,
    pub created_by: Option<String>,
}

/// Partial update accepted by `updateZone`; `None` fields are left as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneUpdate {
    pub name: Option<String>,
    pub zone_type: Option<ZoneType>,
    pub status: Option<ZoneStatus>,
    pub description: Option<String>,
    pub coordinates: Option<Vec<Coordinate>>,
    pub risk_level: Option<u8>,
    pub alert_message: Option<String>,
    pub emergency_contacts: Option<Vec<String>>,
}

pub const ZONE_NAME_MIN_LEN: usize = 3;
pub const ZONE_NAME_MAX_LEN: usize = 100;
pub const ZONE_MIN_VERTICES: usize = 3;
pub const ZONE_MAX_VERTICES: usize = 100;
pub const ZONE_MIN_AREA_M2: f64 = 100.0;
pub const ZONE_MAX_AREA_M2: f64 = 1.0e9;

/// One point reading for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub user_id: String,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub battery: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub device_id: Option<String>,
    pub network_type: Option<String>,
    pub app_version: Option<String>,
}

/// Inbound shape accepted by `updateLocation`, mirroring §4.5's "stamps
/// `timestamp` if absent" rule: the wire timestamp is optional, the
/// in-memory [`LocationUpdate`] timestamp is not.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub user_id: String,
    pub coordinate: Coordinate,
    pub timestamp: Option<DateTime<Utc>>,
    pub accuracy: Option<f64>,
    pub battery: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub device_id: Option<String>,
    pub network_type: Option<String>,
    pub app_version: Option<String>,
}

impl LocationInput {
    pub fn into_update(self) -> LocationUpdate {
        LocationUpdate {
            user_id: self.user_id,
            coordinate: self.coordinate,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            accuracy: self.accuracy,
            battery: self.battery,
            speed: self.speed,
            bearing: self.bearing,
            device_id: self.device_id,
            network_type: self.network_type,
            app_version: self.app_version,
        }
    }
}

impl LocationUpdate {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.user_id.trim().is_empty() {
            return Err(EngineError::validation("userId must not be empty"));
        }
        self.coordinate.validate()?;
        if let Some(acc) = self.accuracy {
            if !(0.0..=10_000.0).contains(&acc) {
                return Err(EngineError::validation("accuracy must be within 0..=10000 m"));
            }
        }
        if let Some(b) = self.battery {
            if !(0.0..=100.0).contains(&b) {
                return Err(EngineError::validation("battery must be within 0..=100"));
            }
        }
        if let Some(s) = self.speed {
            if s < 0.0 {
                return Err(EngineError::validation("speed must be >= 0"));
            }
        }
        if let Some(b) = self.bearing {
            if !(0.0..=360.0).contains(&b) {
                return Err(EngineError::validation("bearing must be within 0..=360"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceEventType {
    Enter,
    Exit,
    Inside,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    /// Derives the alert level from a zone's risk level, per the mapping
    /// table `{>=9: critical, >=7: high, >=5: medium, else: low}`.
    pub fn from_risk_level(risk_level: u8) -> Self {
        if risk_level >= 9 {
            AlertLevel::Critical
        } else if risk_level >= 7 {
            AlertLevel::High
        } else if risk_level >= 5 {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEventMetadata {
    pub alert_level: AlertLevel,
    pub event_source: String,
    pub previous_zone_id: Option<Uuid>,
    pub time_in_zone: Option<chrono::Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub id: Uuid,
    pub user_id: String,
    pub zone_id: Uuid,
    pub zone_name: String,
    pub zone_type: ZoneType,
    pub event_type: GeofenceEventType,
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub webhook_delivered: bool,
    pub metadata: GeofenceEventMetadata,
}

/// The `user` field of a delivered [`WebhookPayload`] — deliberately
/// minimal, since the dispatcher only ever knows a user by id.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookUser {
    pub id: String,
}

/// The full envelope POSTed to a webhook target: the event, the zone it
/// fired against (absent if the zone was deleted before delivery), the
/// user, a delivery timestamp, and the HMAC-SHA256 signature computed
/// over the JSON-encoded `event` alone.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: GeofenceEvent,
    pub zone: Option<Zone>,
    pub user: WebhookUser,
    pub timestamp: DateTime<Utc>,
    pub signature: Option<String>,
}

impl GeofenceEvent {
    pub fn new(
        user_id: String,
        zone: &Zone,
        event_type: GeofenceEventType,
        coordinate: Coordinate,
        event_source: impl Into<String>,
    ) -> Self {
        GeofenceEvent {
            id: Uuid::new_v4(),
            user_id,
            zone_id: zone.id,
            zone_name: zone.name.clone(),
            zone_type: zone.zone_type,
            event_type,
            coordinate,
            timestamp: Utc::now(),
            processed: false,
            webhook_delivered: false,
            metadata: GeofenceEventMetadata {
                alert_level: AlertLevel::from_risk_level(zone.risk_level),
                event_source: event_source.into(),
                previous_zone_id: None,
                time_in_zone: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl RetryConfig {
    pub fn defaults() -> Self {
        RetryConfig {
            max_retries: 3,
            retry_delay_ms: 1000,
            exponential_backoff: false,
        }
    }
}

/// Subscriber record for webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
    pub enabled: bool,
    pub zone_ids: HashSet<Uuid>,
    pub zone_types: HashSet<ZoneType>,
    pub event_types: HashSet<GeofenceEventType>,
    pub retry_config: RetryConfig,
    pub headers: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookConfig {
    /// §3 matching rule.
    pub fn matches(&self, event: &GeofenceEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.zone_ids.is_empty() && !self.zone_ids.contains(&event.zone_id) {
            return false;
        }
        if !self.zone_types.is_empty() && !self.zone_types.contains(&event.zone_type) {
            return false;
        }
        true
    }
}

/// Draft fields accepted by `registerWebhook`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDraft {
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
    pub zone_ids: HashSet<Uuid>,
    pub zone_types: HashSet<ZoneType>,
    pub event_types: HashSet<GeofenceEventType>,
    pub retry_config: Option<RetryConfig>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Primary,
    Replica,
}

/// Pool-internal connection bookkeeping (§3 "Connection record").
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: u64,
    pub role: ConnectionRole,
    pub connected: bool,
    pub health_score: i32,
    pub last_error: Option<String>,
    pub last_successful_ping: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    pub fn new(id: u64, role: ConnectionRole) -> Self {
        ConnectionRecord {
            id,
            role,
            connected: false,
            health_score: 50,
            last_error: None,
            last_successful_ping: None,
        }
    }
}

pub mod units {
    /// Metre-conversion factors for supported length units.
    pub fn to_metres_factor(unit: &str) -> Option<f64> {
        match unit {
            "m" => Some(1.0),
            "km" => Some(1000.0),
            "mi" => Some(1609.344),
            "ft" => Some(0.3048),
            "nmi" => Some(1852.0),
            _ => None,
        }
    }

    pub fn convert(distance_m: f64, to_unit: &str) -> Option<f64> {
        to_metres_factor(to_unit).map(|f| distance_m / f)
    }

    pub fn convert_units(value: f64, from: &str, to: &str) -> Option<f64> {
        let metres = to_metres_factor(from)? * value;
        convert(metres, to)
    }
}
