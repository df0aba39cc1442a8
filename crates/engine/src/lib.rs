//! Storefront analytics engine: configuration, snapshot caching, and the
//! pipeline that runs every analyzer over a snapshot.

pub mod cache;
pub mod config;
pub mod pipeline;

pub use cache::{CachedSnapshot, SnapshotCache};
pub use config::AnalyticsConfig;
pub use pipeline::{AnalyticsPipeline, AnalyticsReport, EngineFailure, EngineKind};
