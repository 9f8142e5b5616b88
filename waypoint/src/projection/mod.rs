//! Projection layer: hot cache for opaque projected documents plus the
//! signal engine that keeps it current.

pub mod document;
pub mod engine;
pub mod store;

pub use document::ProjectedDocument;
pub use engine::{spawn_engine_task, ProjectionEngine, ProjectionSignal};
pub use store::{ProjectionConfig, ProjectionStats, ProjectionStore};
