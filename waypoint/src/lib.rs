//! Waypoint - read-through caching gateway
//!
//! Sits between applications and a slow, strongly-consistent ledger
//! backend. Reads resolve through a tier chain (projection hot cache →
//! ledger → delivery mirror); writes queue in a priority buffer that
//! batches, deduplicates, and retries submissions to the ledger.

pub mod cache;
pub mod config;
pub mod ledger;
pub mod projection;
pub mod server;
pub mod types;

pub use types::{Result, WaypointError};
