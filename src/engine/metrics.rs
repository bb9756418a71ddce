//! Prometheus metrics for the geofencing engine, grounded on the teacher's
//! `dns/metrics.rs` lazy_static registration style.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    pub static ref LOCATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "geofence_locations_total",
        "Total location updates processed",
        &["outcome"]
    )
    .unwrap();

    pub static ref EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "geofence_events_total",
        "Total geofence events detected",
        &["event_type"]
    )
    .unwrap();

    pub static ref WEBHOOK_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "geofence_webhook_deliveries_total",
        "Total webhook delivery attempts",
        &["outcome"]
    )
    .unwrap();

    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "geofence_cache_operations_total",
        "Cache operations by class",
        &["op", "outcome"]
    )
    .unwrap();

    pub static ref CONNECTION_HEALTH_SCORE: IntGaugeVec = register_int_gauge_vec!(
        "geofence_connection_health_score",
        "Current health score per spatial-index connection role",
        &["role"]
    )
    .unwrap();

    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "geofence_queue_depth",
        "Current queue depth per component",
        &["component"]
    )
    .unwrap();
}

/// Folds an [`crate::engine::observation::Observation`] into the relevant
/// counters/gauges. Called alongside `log_observation` so metrics and logs
/// never drift apart.
pub fn record_observation(obs: &crate::engine::observation::Observation) {
    use crate::engine::observation::Observation;
    match obs {
        Observation::QueueOverflow { component, depth } => {
            QUEUE_DEPTH.with_label_values(&[component]).set(*depth as i64);
        }
        Observation::WebhookDelivered { .. } => {
            WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
        }
        Observation::WebhookDeliveryFailed { .. } => {
            WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
        }
        Observation::ConnectionStateChanged { role, connected, .. } => {
            CONNECTION_HEALTH_SCORE
                .with_label_values(&[role])
                .set(if *connected { 1 } else { 0 });
        }
        Observation::LocationFailed { .. } => {
            LOCATIONS_TOTAL.with_label_values(&["failed"]).inc();
        }
        Observation::BatchPartial { component, .. } => {
            QUEUE_DEPTH.with_label_values(&[component]).inc();
        }
        Observation::PerformanceAlert { .. } | Observation::HealthDegraded { .. } => {}
    }
}

pub fn record_location_success() {
    LOCATIONS_TOTAL.with_label_values(&["success"]).inc();
}

pub fn record_event(event_type: &str) {
    EVENTS_TOTAL.with_label_values(&[event_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered_without_panic() {
        record_location_success();
        record_event("enter");
        assert!(LOCATIONS_TOTAL.with_label_values(&["success"]).get() >= 1);
    }
}
