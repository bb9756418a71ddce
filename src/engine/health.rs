//! Health aggregation for the orchestrator (C9), grounded on the teacher's
//! `dns/health.rs` threshold-classification pattern.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub primary_connected: bool,
    pub healthy_replica_count: usize,
    pub total_replica_count: usize,
    pub governor_queue_depth: usize,
    pub bulk_queue_depth: usize,
    pub webhook_queue_depth: usize,
    pub recent_failure_rate: f64,
}

/// Inputs gathered from C1/C2/C6/C8 right before classification.
pub struct HealthInputs {
    pub primary_connected: bool,
    pub healthy_replica_count: usize,
    pub total_replica_count: usize,
    pub governor_queue_depth: usize,
    pub bulk_queue_depth: usize,
    pub webhook_queue_depth: usize,
    pub recent_failure_rate: f64,
}

/// Classifies overall health per the thresholds: a failure rate over 50%
/// or a dead primary is unhealthy; a failure rate over 20% or any queue
/// past 1000 is degraded; a queue past 100 alone only degrades if paired
/// with a nonzero failure rate, matching the "queue depth alone is not
/// fatal" reading of the source thresholds.
pub fn classify(inputs: &HealthInputs) -> HealthStatus {
    let max_queue = inputs
        .governor_queue_depth
        .max(inputs.bulk_queue_depth)
        .max(inputs.webhook_queue_depth);

    let state = if !inputs.primary_connected || inputs.recent_failure_rate > 0.5 {
        HealthState::Unhealthy
    } else if inputs.recent_failure_rate > 0.2 || max_queue > 1000 {
        HealthState::Degraded
    } else if max_queue > 100 && inputs.recent_failure_rate > 0.0 {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    };

    HealthStatus {
        state,
        primary_connected: inputs.primary_connected,
        healthy_replica_count: inputs.healthy_replica_count,
        total_replica_count: inputs.total_replica_count,
        governor_queue_depth: inputs.governor_queue_depth,
        bulk_queue_depth: inputs.bulk_queue_depth,
        webhook_queue_depth: inputs.webhook_queue_depth,
        recent_failure_rate: inputs.recent_failure_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HealthInputs {
        HealthInputs {
            primary_connected: true,
            healthy_replica_count: 2,
            total_replica_count: 2,
            governor_queue_depth: 0,
            bulk_queue_depth: 0,
            webhook_queue_depth: 0,
            recent_failure_rate: 0.0,
        }
    }

    #[test]
    fn test_healthy_baseline() {
        assert_eq!(classify(&base()).state, HealthState::Healthy);
    }

    #[test]
    fn test_no_primary_is_unhealthy() {
        let mut inputs = base();
        inputs.primary_connected = false;
        assert_eq!(classify(&inputs).state, HealthState::Unhealthy);
    }

    #[test]
    fn test_high_failure_rate_is_unhealthy() {
        let mut inputs = base();
        inputs.recent_failure_rate = 0.6;
        assert_eq!(classify(&inputs).state, HealthState::Unhealthy);
    }

    #[test]
    fn test_moderate_failure_rate_is_degraded() {
        let mut inputs = base();
        inputs.recent_failure_rate = 0.3;
        assert_eq!(classify(&inputs).state, HealthState::Degraded);
    }

    #[test]
    fn test_deep_queue_is_degraded() {
        let mut inputs = base();
        inputs.bulk_queue_depth = 1500;
        assert_eq!(classify(&inputs).state, HealthState::Degraded);
    }
}
