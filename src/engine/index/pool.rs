//! Spatial-Index Client Pool (C1): one primary connection, N read
//! replicas, failover, health probing, and bounded retries. Grounded on
//! the connection-pool/health-probe pattern used for upstream DNS
//! connections, adapted to a single long-lived TCP stream per role
//! speaking the spatial index's text protocol.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::engine::errors::{EngineError, EngineResult};
use crate::engine::index::protocol::{Command, Reply};
use crate::engine::model::{ConnectionRecord, ConnectionRole};

/// Tunables for the pool, surfaced through [`crate::engine::config::Settings`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connect_initial_backoff: Duration,
    pub connect_max_attempts: u32,
    pub health_probe_interval: Duration,
    pub read_retry_attempts: u32,
    pub query_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            connect_initial_backoff: Duration::from_secs(1),
            connect_max_attempts: 5,
            health_probe_interval: Duration::from_secs(30),
            read_retry_attempts: 3,
            query_timeout: Duration::from_millis(3000),
        }
    }
}

struct ManagedConnection {
    addr: SocketAddr,
    record: RwLock<ConnectionRecord>,
    stream: AsyncMutex<Option<BufReader<TcpStream>>>,
}

impl ManagedConnection {
    fn new(id: u64, role: ConnectionRole, addr: SocketAddr) -> Self {
        ManagedConnection {
            addr,
            record: RwLock::new(ConnectionRecord::new(id, role)),
            stream: AsyncMutex::new(None),
        }
    }

    fn is_connected(&self) -> bool {
        self.record.read().connected
    }

    fn health_score(&self) -> i32 {
        self.record.read().health_score
    }

    fn role(&self) -> ConnectionRole {
        self.record.read().role
    }

    async fn connect_with_backoff(&self, config: &PoolConfig) -> EngineResult<()> {
        let mut delay = config.connect_initial_backoff;
        let mut last_err = None;
        for attempt in 0..config.connect_max_attempts {
            match TcpStream::connect(self.addr).await {
                Ok(stream) => {
                    *self.stream.lock().await = Some(BufReader::new(stream));
                    let mut rec = self.record.write();
                    rec.connected = true;
                    rec.last_error = None;
                    info!(addr = %self.addr, attempt, "spatial index connection established");
                    return Ok(());
                }
                Err(e) => {
                    warn!(addr = %self.addr, attempt, error = %e, "spatial index connect attempt failed");
                    last_err = Some(e.to_string());
                    if attempt + 1 < config.connect_max_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        let mut rec = self.record.write();
        rec.connected = false;
        rec.last_error = last_err.clone();
        Err(EngineError::connection_failed(format!(
            "failed to connect to {} after {} attempts: {}",
            self.addr,
            config.connect_max_attempts,
            last_err.unwrap_or_default()
        )))
    }

    async fn send_command(&self, cmd: &Command, timeout: Duration) -> EngineResult<Reply> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| {
            EngineError::connection_failed(format!("{} has no open connection", self.addr))
        })?;

        let fut = async {
            stream.write_all(cmd.encode().as_bytes()).await?;
            stream.flush().await?;
            let mut line = String::new();
            stream.read_line(&mut line).await?;
            Ok::<String, std::io::Error>(line)
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(line)) => {
                let reply = Reply::parse(&line);
                self.record_outcome(true, Duration::from_millis(0));
                Ok(reply)
            }
            Ok(Err(e)) => {
                self.mark_down(&e.to_string());
                Err(e.into())
            }
            Err(_) => {
                self.record_outcome(false, timeout);
                Err(EngineError::query_timeout(format!(
                    "spatial index at {} did not respond within {:?}",
                    self.addr, timeout
                )))
            }
        }
    }

    fn mark_down(&self, error: &str) {
        let mut rec = self.record.write();
        rec.connected = false;
        rec.last_error = Some(error.to_string());
        rec.health_score = (rec.health_score - 10).max(0);
    }

    /// Health-score update per C2's health-aware routing table, applied
    /// here so C1's own round robin also benefits from freshness.
    fn record_outcome(&self, success: bool, latency: Duration) {
        let mut rec = self.record.write();
        if success {
            let delta = if latency < Duration::from_millis(100) {
                5
            } else if latency < Duration::from_millis(500) {
                2
            } else {
                1
            };
            rec.health_score = (rec.health_score + delta).min(100);
        } else {
            rec.health_score = (rec.health_score - 10).max(0);
        }
    }

    async fn ping(&self, config: &PoolConfig) {
        match self.send_command(&Command::Ping, config.query_timeout).await {
            Ok(reply) if reply.is_ok() => {
                let mut rec = self.record.write();
                rec.connected = true;
                rec.last_successful_ping = Some(chrono::Utc::now());
            }
            _ => {
                warn!(addr = %self.addr, "health probe failed, attempting reconnect");
                let _ = self.connect_with_backoff(config).await;
            }
        }
    }
}

/// A lightweight handle identifying which connection served (or should
/// serve) a request; used by the governor for health-aware selection.
#[derive(Clone, Copy)]
pub struct ConnectionHandle {
    pub connection_id: u64,
    pub role: ConnectionRole,
}

pub struct ClientPool {
    primary: Arc<ManagedConnection>,
    replicas: Vec<Arc<ManagedConnection>>,
    config: PoolConfig,
    round_robin: AtomicUsize,
    next_id: AtomicU64,
}

impl ClientPool {
    pub fn new(primary_addr: SocketAddr, replica_addrs: Vec<SocketAddr>, config: PoolConfig) -> Self {
        let next_id = AtomicU64::new(1);
        let primary = Arc::new(ManagedConnection::new(0, ConnectionRole::Primary, primary_addr));
        let replicas = replica_addrs
            .into_iter()
            .map(|addr| {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                Arc::new(ManagedConnection::new(id, ConnectionRole::Replica, addr))
            })
            .collect();
        ClientPool {
            primary,
            replicas,
            config,
            round_robin: AtomicUsize::new(0),
            next_id,
        }
    }

    /// Opens the primary and all replica connections. Replica failures are
    /// logged but not fatal; primary failure is.
    pub async fn connect_all(&self) -> EngineResult<()> {
        self.primary.connect_with_backoff(&self.config).await?;
        for replica in &self.replicas {
            if let Err(e) = replica.connect_with_backoff(&self.config).await {
                warn!(error = %e, "replica connection failed at startup, will retry via health probe");
            }
        }
        Ok(())
    }

    pub fn get_write_handle(&self) -> EngineResult<ConnectionHandle> {
        if !self.primary.is_connected() {
            return Err(EngineError::primary_unavailable(
                "primary spatial-index connection is down",
            ));
        }
        Ok(ConnectionHandle {
            connection_id: self.primary.record.read().id,
            role: ConnectionRole::Primary,
        })
    }

    fn healthy_read_pool(&self) -> Vec<Arc<ManagedConnection>> {
        let mut pool = Vec::with_capacity(1 + self.replicas.len());
        if self.primary.is_connected() {
            pool.push(self.primary.clone());
        }
        pool.extend(self.replicas.iter().filter(|r| r.is_connected()).cloned());
        pool
    }

    pub fn get_read_handle(&self) -> EngineResult<ConnectionHandle> {
        let pool = self.healthy_read_pool();
        if pool.is_empty() {
            return Err(EngineError::no_healthy_connection(
                "no primary or replica spatial-index connection is healthy",
            ));
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % pool.len();
        let conn = &pool[idx];
        Ok(ConnectionHandle {
            connection_id: conn.record.read().id,
            role: conn.role(),
        })
    }

    fn find_connection(&self, handle: ConnectionHandle) -> Option<Arc<ManagedConnection>> {
        if handle.role == ConnectionRole::Primary {
            return Some(self.primary.clone());
        }
        self.replicas
            .iter()
            .find(|r| r.record.read().id == handle.connection_id)
            .cloned()
    }

    /// Executes a read, retrying up to `read_retry_attempts` with delays
    /// 1s, 2s, 3s, picking the highest-health-score handle fresh each
    /// attempt so retries naturally steer away from a connection that
    /// just failed.
    pub async fn execute_read(&self, cmd: Command) -> EngineResult<Reply> {
        let mut last_err = None;
        for attempt in 0..self.config.read_retry_attempts {
            let handle = self.best_read_handle()?;
            let Some(conn) = self.find_connection(handle) else {
                last_err = Some(EngineError::no_healthy_connection("handle vanished"));
                continue;
            };
            match conn.send_command(&cmd, self.config.query_timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!(attempt, error = %e, "read attempt failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::no_healthy_connection("exhausted read retries")))
    }

    /// Executes a write against the primary only; never silently
    /// redirects to a replica.
    pub async fn execute_write(&self, cmd: Command) -> EngineResult<Reply> {
        let mut last_err = None;
        for attempt in 0..self.config.read_retry_attempts {
            self.get_write_handle()?;
            match self.primary.send_command(&cmd, self.config.query_timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!(attempt, error = %e, "write attempt failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs((attempt + 1) as u64)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::primary_unavailable("exhausted write retries")))
    }

    /// Runs the 30-second health probe against every connection once.
    pub async fn health_probe_tick(&self) {
        self.primary.ping(&self.config).await;
        for replica in &self.replicas {
            replica.ping(&self.config).await;
        }
    }

    pub fn statistics(&self) -> Vec<ConnectionRecord> {
        let mut out = vec![self.primary.record.read().clone()];
        out.extend(self.replicas.iter().map(|r| r.record.read().clone()));
        out
    }

    pub fn healthy_connection_count(&self) -> usize {
        self.healthy_read_pool().len()
    }

    /// Used by the governor to bias selection toward the highest-scoring
    /// healthy handle rather than plain round robin.
    pub fn best_read_handle(&self) -> EngineResult<ConnectionHandle> {
        let pool = self.healthy_read_pool();
        let best = pool
            .iter()
            .max_by_key(|c| c.health_score())
            .ok_or_else(|| EngineError::no_healthy_connection("no healthy read connection"))?;
        Ok(ConnectionHandle {
            connection_id: best.record.read().id,
            role: best.role(),
        })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn allocate_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.connect_max_attempts, 5);
        assert_eq!(cfg.read_retry_attempts, 3);
    }

    #[test]
    fn test_no_connections_yields_no_healthy_connection() {
        let addr: SocketAddr = "127.0.0.1:19999".parse().unwrap();
        let pool = ClientPool::new(addr, vec![], PoolConfig::default());
        assert!(pool.get_read_handle().is_err());
        assert!(pool.get_write_handle().is_err());
    }
}
