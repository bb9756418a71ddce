//! Geofencing engine for a tourist-safety platform.
//!
//! The engine ingests per-user location updates, maintains an in-memory
//! spatial index of "who is where" via a pooled connection to an external
//! Tile38-like server, stores polygonal safety zones, detects zone
//! enter/exit/inside events, and fans events out to subscribed HTTP
//! webhooks with retry and delivery accounting.
//!
//! # Architecture
//!
//! Nine components, wired bottom-up by [`engine::orchestrator::Builder`]:
//! a pooled spatial-index client, a rate-limiting request governor, a
//! lookaside cache, a zone manager, a location indexer, a bulk location
//! processor, a geofence event detector, a webhook dispatcher, and the
//! orchestrator that ties them together behind one public operation
//! surface.

pub mod engine;

pub use engine::config::Settings;
pub use engine::errors::{EngineError, EngineResult};
pub use engine::orchestrator::{Builder, Orchestrator};
