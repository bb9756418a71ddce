//! Settings: the engine's configuration surface, grounded on the teacher's
//! `ServerContext`/`Default` pattern but loaded from `GEOFENCE_*` env vars
//! instead of a zones directory, plus a `GEOFENCE_PROFILE` switch selecting
//! the dev/test/prod timeout table from §5.

use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::bulk::BulkProcessorConfig;
use crate::engine::detector::DetectorConfig;
use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::governor::GovernorConfig;
use crate::engine::index::PoolConfig;
use crate::engine::location::LocationIndexerConfig;
use crate::engine::webhooks::WebhookDispatcherConfig;
use crate::engine::zones::ZoneManagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Test,
    Prod,
}

impl Profile {
    fn from_env_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Profile::Prod,
            "test" => Profile::Test,
            _ => Profile::Dev,
        }
    }

    fn query_timeout(&self) -> Duration {
        match self {
            Profile::Prod => Duration::from_millis(3000),
            Profile::Test => Duration::from_millis(1000),
            Profile::Dev => Duration::from_millis(5000),
        }
    }

    fn webhook_timeout(&self) -> Duration {
        match self {
            Profile::Prod => Duration::from_millis(5000),
            Profile::Test => Duration::from_millis(2000),
            Profile::Dev => Duration::from_millis(10_000),
        }
    }
}

/// Top-level engine configuration, handed to [`crate::engine::orchestrator::Builder`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: Profile,
    pub primary_addr: SocketAddr,
    pub replica_addrs: Vec<SocketAddr>,
    pub connection_ready_wait: Duration,
    pub pool: PoolConfig,
    pub governor: GovernorConfig,
    pub location: LocationIndexerConfig,
    pub zones: ZoneManagerConfig,
    pub bulk: BulkProcessorConfig,
    pub detector: DetectorConfig,
    pub webhooks: WebhookDispatcherConfig,
    pub cache_ttl_location: Duration,
    pub cache_ttl_zone: Duration,
    pub cache_ttl_nearby: Duration,
    pub cache_ttl_geofence: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let profile = Profile::Dev;
        let mut pool = PoolConfig::default();
        pool.query_timeout = profile.query_timeout();
        let mut webhooks = WebhookDispatcherConfig::default();
        webhooks.delivery_timeout = profile.webhook_timeout();

        Settings {
            profile,
            primary_addr: "127.0.0.1:9851".parse().unwrap(),
            replica_addrs: Vec::new(),
            connection_ready_wait: Duration::from_millis(30_000),
            pool,
            governor: GovernorConfig::default(),
            location: LocationIndexerConfig::default(),
            zones: ZoneManagerConfig::default(),
            bulk: BulkProcessorConfig::default(),
            detector: DetectorConfig::default(),
            webhooks,
            cache_ttl_location: Duration::from_secs(300),
            cache_ttl_zone: Duration::from_secs(300),
            cache_ttl_nearby: Duration::from_secs(300),
            cache_ttl_geofence: Duration::from_secs(60),
        }
    }
}

impl Settings {
    /// Loads overrides from `GEOFENCE_*` environment variables on top of
    /// the profile-selected defaults. Unset variables keep the default;
    /// malformed ones are a validation error rather than a silent fallback.
    pub fn from_env() -> EngineResult<Self> {
        let profile = std::env::var("GEOFENCE_PROFILE")
            .map(|s| Profile::from_env_str(&s))
            .unwrap_or(Profile::Dev);

        let mut settings = Settings::default();
        settings.profile = profile;
        settings.pool.query_timeout = profile.query_timeout();
        settings.webhooks.delivery_timeout = profile.webhook_timeout();

        if let Ok(addr) = std::env::var("GEOFENCE_PRIMARY_ADDR") {
            settings.primary_addr = addr
                .parse()
                .map_err(|_| EngineError::validation(format!("invalid GEOFENCE_PRIMARY_ADDR: {addr}")))?;
        }
        if let Ok(replicas) = std::env::var("GEOFENCE_REPLICA_ADDRS") {
            settings.replica_addrs = replicas
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim()
                        .parse()
                        .map_err(|_| EngineError::validation(format!("invalid replica addr: {s}")))
                })
                .collect::<EngineResult<Vec<SocketAddr>>>()?;
        }
        if let Ok(ms) = std::env::var("GEOFENCE_CONNECTION_READY_WAIT_MS") {
            settings.connection_ready_wait = Duration::from_millis(
                ms.parse()
                    .map_err(|_| EngineError::validation("invalid GEOFENCE_CONNECTION_READY_WAIT_MS"))?,
            );
        }
        if let Ok(size) = std::env::var("GEOFENCE_BULK_BATCH_SIZE") {
            settings.bulk.batch_size = size
                .parse()
                .map_err(|_| EngineError::validation("invalid GEOFENCE_BULK_BATCH_SIZE"))?;
        }
        if let Ok(n) = std::env::var("GEOFENCE_BULK_CONCURRENCY") {
            settings.bulk.concurrency = n
                .parse()
                .map_err(|_| EngineError::validation("invalid GEOFENCE_BULK_CONCURRENCY"))?;
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_dev_timeouts() {
        let settings = Settings::default();
        assert_eq!(settings.pool.query_timeout, Duration::from_millis(5000));
        assert_eq!(settings.webhooks.delivery_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn test_profile_prod_timeouts() {
        assert_eq!(Profile::Prod.query_timeout(), Duration::from_millis(3000));
        assert_eq!(Profile::Prod.webhook_timeout(), Duration::from_millis(5000));
    }
}
