//! Shared data model for the storefront analytics engines: typed events and
//! reference records, per-record validation, the read-only event store, and
//! calendar period bucketing.

pub mod error;
pub mod ingest;
pub mod period;
pub mod store;
pub mod types;

pub use error::{AnalyticsError, AnalyticsResult};
pub use ingest::{ingest, IngestDiagnostics, RecordIssue, RecordKind};
pub use period::Period;
pub use store::{EventFilter, EventStore};
pub use types::{Event, EventType, Product, Snapshot, User};
