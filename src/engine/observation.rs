//! Typed observer channels, replacing any event-emitter-style inheritance:
//! components never log for themselves, they emit an [`Observation`] and
//! the orchestrator fans it out to `tracing` (and, where relevant,
//! `prometheus` counters).

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Observation {
    QueueOverflow { component: &'static str, depth: usize },
    PerformanceAlert { component: &'static str, metric: &'static str, value: f64 },
    WebhookDelivered { webhook_id: uuid::Uuid, event_id: uuid::Uuid, attempts: u32 },
    WebhookDeliveryFailed { webhook_id: uuid::Uuid, event_id: uuid::Uuid, attempts: u32 },
    ConnectionStateChanged { connection_id: u64, role: &'static str, connected: bool },
    HealthDegraded { previous: &'static str, current: &'static str, reason: String },
    LocationFailed { user_id: String, reason: String },
    BatchPartial { component: &'static str, failed: usize, total: usize },
}

pub type ObservationSender = mpsc::UnboundedSender<Observation>;
pub type ObservationReceiver = mpsc::UnboundedReceiver<Observation>;

pub fn channel() -> (ObservationSender, ObservationReceiver) {
    mpsc::unbounded_channel()
}

/// Logs every observation through `tracing` at a level matching its
/// severity; consumed by the orchestrator's background forwarding task.
pub fn log_observation(obs: &Observation) {
    match obs {
        Observation::QueueOverflow { component, depth } => {
            tracing::warn!(component, depth, "queue overflow");
        }
        Observation::PerformanceAlert { component, metric, value } => {
            tracing::warn!(component, metric, value, "performance alert");
        }
        Observation::WebhookDelivered { webhook_id, event_id, attempts } => {
            tracing::info!(%webhook_id, %event_id, attempts, "webhook delivered");
        }
        Observation::WebhookDeliveryFailed { webhook_id, event_id, attempts } => {
            tracing::error!(%webhook_id, %event_id, attempts, "webhook delivery exhausted retries");
        }
        Observation::ConnectionStateChanged { connection_id, role, connected } => {
            tracing::info!(connection_id, role, connected, "connection state changed");
        }
        Observation::HealthDegraded { previous, current, reason } => {
            tracing::warn!(previous, current, reason, "health state transition");
        }
        Observation::LocationFailed { user_id, reason } => {
            tracing::error!(user_id, reason, "location processing failed");
        }
        Observation::BatchPartial { component, failed, total } => {
            tracing::warn!(component, failed, total, "batch partially failed");
        }
    }
}
