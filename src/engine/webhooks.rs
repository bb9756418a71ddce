//! Webhook Dispatcher (C8): registers HTTP subscribers, matches delivered
//! geofence events against them, signs payloads with HMAC-SHA256, and
//! retries failed deliveries with linear backoff. Grounded on the
//! teacher's outbound-HTTP-notification pattern, substituting webhook
//! delivery for the teacher's upstream notification target.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::Client;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::model::{
    GeofenceEvent, RetryConfig, WebhookConfig, WebhookDraft, WebhookPayload, WebhookUser, Zone,
};
use crate::engine::observation::{Observation, ObservationSender};

#[derive(Debug, Clone)]
pub struct WebhookDispatcherConfig {
    pub drain_interval: Duration,
    pub batch_size: usize,
    pub preflight_timeout: Duration,
    pub delivery_timeout: Duration,
}

impl Default for WebhookDispatcherConfig {
    fn default() -> Self {
        WebhookDispatcherConfig {
            drain_interval: Duration::from_millis(100),
            batch_size: 50,
            preflight_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

struct QueuedDelivery {
    webhook_id: Uuid,
    event: GeofenceEvent,
    zone: Option<Zone>,
    attempt: u32,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookStats {
    pub total_attempted: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

struct WebhookCounters {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Default for WebhookCounters {
    fn default() -> Self {
        WebhookCounters {
            attempted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

pub struct WebhookDispatcher {
    http: Client,
    config: WebhookDispatcherConfig,
    webhooks: RwLock<HashMap<Uuid, WebhookConfig>>,
    queue: RwLock<VecDeque<QueuedDelivery>>,
    observations: ObservationSender,
    per_webhook_stats: RwLock<HashMap<Uuid, WebhookCounters>>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatcherConfig, observations: ObservationSender) -> Self {
        WebhookDispatcher {
            http: Client::builder()
                .timeout(config.delivery_timeout)
                .build()
                .expect("reqwest client builds with default TLS backend"),
            config,
            webhooks: RwLock::new(HashMap::new()),
            queue: RwLock::new(VecDeque::new()),
            observations,
            per_webhook_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-flights the target URL with a `HEAD` request before accepting
    /// the registration, per §4.8.
    pub async fn register_webhook(&self, draft: WebhookDraft) -> EngineResult<WebhookConfig> {
        self.preflight(&draft.url).await?;

        let now = Utc::now();
        let webhook = WebhookConfig {
            id: Uuid::new_v4(),
            name: draft.name,
            url: draft.url,
            secret: draft.secret,
            enabled: true,
            zone_ids: draft.zone_ids,
            zone_types: draft.zone_types,
            event_types: draft.event_types,
            retry_config: draft.retry_config.unwrap_or_else(RetryConfig::defaults),
            headers: draft.headers,
            created_at: now,
            updated_at: now,
        };
        self.webhooks.write().insert(webhook.id, webhook.clone());
        self.per_webhook_stats
            .write()
            .entry(webhook.id)
            .or_default();
        Ok(webhook)
    }

    pub async fn update_webhook(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut WebhookConfig),
    ) -> EngineResult<WebhookConfig> {
        let mut webhooks = self.webhooks.write();
        let webhook = webhooks
            .get_mut(&id)
            .ok_or_else(|| EngineError::validation(format!("webhook {id} not found")))?;
        mutate(webhook);
        webhook.updated_at = Utc::now();
        Ok(webhook.clone())
    }

    pub fn remove_webhook(&self, id: Uuid) {
        self.webhooks.write().remove(&id);
        self.per_webhook_stats.write().remove(&id);
    }

    pub fn get_webhook(&self, id: Uuid) -> Option<WebhookConfig> {
        self.webhooks.read().get(&id).cloned()
    }

    pub fn list_webhooks(&self) -> Vec<WebhookConfig> {
        self.webhooks.read().values().cloned().collect()
    }

    async fn preflight(&self, url: &str) -> EngineResult<()> {
        let resp = self
            .http
            .head(url)
            .timeout(self.config.preflight_timeout)
            .send()
            .await
            .map_err(|e| {
                EngineError::validation(format!("webhook URL preflight failed: {e}"))
            })?;
        if resp.status().as_u16() >= 400 {
            return Err(EngineError::validation(format!(
                "webhook URL returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Matches `event` against every enabled webhook and enqueues one
    /// delivery per match. Called by the orchestrator's event-forwarding
    /// task, fed from [`crate::engine::detector::GeofenceDetector`]'s
    /// event channel.
    pub fn enqueue_event(&self, event: GeofenceEvent, zone: Option<Zone>) {
        let matches: Vec<Uuid> = self
            .webhooks
            .read()
            .values()
            .filter(|w| w.matches(&event))
            .map(|w| w.id)
            .collect();
        if matches.is_empty() {
            return;
        }
        let mut queue = self.queue.write();
        for webhook_id in matches {
            queue.push_back(QueuedDelivery {
                webhook_id,
                event: event.clone(),
                zone: zone.clone(),
                attempt: 0,
            });
        }
    }

    /// Drains up to `batch_size` queued deliveries, attempting each once.
    /// Failures that still have retry budget are requeued with
    /// `retryDelay * attempt` (linear backoff) respected by the scheduler
    /// skipping a tick rather than sleeping in-line.
    pub async fn drain(&self) -> usize {
        let batch: Vec<QueuedDelivery> = {
            let mut queue = self.queue.write();
            let n = self.config.batch_size.min(queue.len());
            queue.drain(..n).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut to_retry = Vec::new();
        for mut delivery in batch {
            let webhook = self.webhooks.read().get(&delivery.webhook_id).cloned();
            let Some(webhook) = webhook else { continue };
            delivery.attempt += 1;

            match self
                .deliver(&webhook, &delivery.event, delivery.zone.clone(), delivery.attempt)
                .await
            {
                Ok(()) => {
                    delivered += 1;
                    self.record(webhook.id, true);
                    let _ = self.observations.send(Observation::WebhookDelivered {
                        webhook_id: webhook.id,
                        event_id: delivery.event.id,
                        attempts: delivery.attempt,
                    });
                }
                Err(err) => {
                    if delivery.attempt >= webhook.retry_config.max_retries {
                        self.record(webhook.id, false);
                        let _ = self.observations.send(Observation::WebhookDeliveryFailed {
                            webhook_id: webhook.id,
                            event_id: delivery.event.id,
                            attempts: delivery.attempt,
                        });
                        warn!(webhook_id = %webhook.id, error = %err, "webhook delivery exhausted retries");
                    } else {
                        to_retry.push(delivery);
                    }
                }
            }
        }

        if !to_retry.is_empty() {
            let mut queue = self.queue.write();
            for d in to_retry.into_iter().rev() {
                queue.push_front(d);
            }
        }
        delivered
    }

    async fn deliver(
        &self,
        webhook: &WebhookConfig,
        event: &GeofenceEvent,
        zone: Option<Zone>,
        attempt: u32,
    ) -> EngineResult<()> {
        if attempt > 1 {
            let delay = webhook.retry_config.retry_delay_ms * attempt as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        // Signature covers the event alone, not the wrapping envelope, so
        // a subscriber can verify it without knowing the envelope shape.
        let event_body = serde_json::to_vec(event)?;
        let signature = sign_payload(webhook.secret.as_deref(), &event_body);

        let payload = WebhookPayload {
            event: event.clone(),
            zone,
            user: WebhookUser { id: event.user_id.clone() },
            timestamp: Utc::now(),
            signature,
        };
        let body = serde_json::to_vec(&payload)?;

        let mut req = self
            .http
            .post(&webhook.url)
            .timeout(self.config.delivery_timeout)
            .header("Content-Type", "application/json")
            .header("X-Geofence-Event-Id", event.id.to_string())
            .header("X-Geofence-Event-Type", format!("{:?}", event.event_type));
        for (k, v) in &webhook.headers {
            req = req.header(k, v);
        }

        let resp = req.body(body).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::webhook_delivery_failed(format!(
                "webhook {} returned status {}",
                webhook.id,
                resp.status()
            )));
        }
        Ok(())
    }

    /// Synthetic delivery that exercises the signing/POST path without
    /// touching delivery statistics, per §4.8's `testWebhook`.
    pub async fn test_webhook(&self, id: Uuid, sample_event: &GeofenceEvent, zone: Option<Zone>) -> EngineResult<()> {
        let webhook = self
            .webhooks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("webhook {id} not found")))?;
        self.deliver(&webhook, sample_event, zone, 1).await
    }

    fn record(&self, webhook_id: Uuid, success: bool) {
        let stats = self.per_webhook_stats.read();
        if let Some(counters) = stats.get(&webhook_id) {
            counters.attempted.fetch_add(1, Ordering::Relaxed);
            if success {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_webhook_statistics(&self, id: Uuid) -> Option<WebhookStats> {
        self.per_webhook_stats.read().get(&id).map(|c| WebhookStats {
            total_attempted: c.attempted.load(Ordering::Relaxed),
            total_delivered: c.delivered.load(Ordering::Relaxed),
            total_failed: c.failed.load(Ordering::Relaxed),
        })
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.read().len()
    }
}

type HmacSha256 = Hmac<Sha256>;

fn sign_payload(secret: Option<&str>, body: &[u8]) -> Option<String> {
    let secret = secret?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}
