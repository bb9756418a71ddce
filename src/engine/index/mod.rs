//! Spatial-Index Client Pool (C1): wire protocol plus pooled, failover
//! connections to the external Tile38-like spatial index.

pub mod pool;
pub mod protocol;

pub use pool::{ClientPool, ConnectionHandle, PoolConfig};
pub use protocol::{Command, Field, Reply, WithinShape};
