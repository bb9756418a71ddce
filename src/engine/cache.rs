//! Cache (C3): a short-TTL lookaside cache for locations, zones, nearby
//! queries, and geofence results. Grounded on the cache/stats pattern used
//! for DNS record caching, with a flat string-keyed map instead of a
//! domain tree since this cache has no hierarchical lookup need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::engine::model::Coordinate;

#[derive(Debug, Clone, Copy)]
pub enum CacheClass {
    Location,
    Zone,
    Nearby,
    Geofence,
}

impl CacheClass {
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheClass::Location => Duration::from_secs(300),
            CacheClass::Zone => Duration::from_secs(300),
            CacheClass::Nearby => Duration::from_secs(300),
            CacheClass::Geofence => Duration::from_secs(60),
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            CacheClass::Location => "location:",
            CacheClass::Zone => "zone:",
            CacheClass::Nearby => "nearby:",
            CacheClass::Geofence => "geofence:",
        }
    }
}

pub fn location_key(user_id: &str) -> String {
    format!("location:{user_id}")
}

pub fn zone_key(zone_id: &uuid::Uuid) -> String {
    format!("zone:{zone_id}")
}

pub fn nearby_key(center: Coordinate, radius_m: f64) -> String {
    let (lat_q, lon_q) = center.quantized();
    format!("nearby:{}:{}:{}", lat_q, lon_q, radius_m.round() as i64)
}

pub fn geofence_key(user_id: &str, point: Coordinate) -> String {
    let (lat_q, lon_q) = point.quantized();
    format!("geofence:{}:{}:{}", user_id, lat_q, lon_q)
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CounterSet {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

/// A lookaside cache. Any internal failure (none are modeled today, since
/// storage is in-process) degrades to a miss rather than propagating, per
/// the component contract.
pub struct Cache {
    store: RwLock<HashMap<String, Entry>>,
    counters: CounterSet,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            store: RwLock::new(HashMap::new()),
            counters: CounterSet::default(),
        }
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) {
        let Ok(payload) = serde_json::to_string(value) else {
            return; // serialization failure degrades silently
        };
        self.store.write().insert(
            key.into(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let hit = {
            let store = self.store.read();
            store.get(key).and_then(|entry| {
                if entry.expires_at >= now {
                    serde_json::from_str(&entry.payload).ok()
                } else {
                    None
                }
            })
        };
        if hit.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            // Lazily evict an expired entry found on lookup.
            self.store.write().remove(key);
        }
        hit
    }

    pub fn delete(&self, key: &str) {
        if self.store.write().remove(key).is_some() {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn delete_prefix(&self, prefix: &str) {
        let mut store = self.store.write();
        let keys: Vec<String> = store
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in keys {
            store.remove(&k);
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let denom = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            hit_rate: if denom > 0 { hits as f64 / denom as f64 } else { 0.0 },
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
