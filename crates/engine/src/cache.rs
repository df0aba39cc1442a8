//! In-process snapshot cache backed by DashMap.
//!
//! Entries are keyed by source name and carry a SHA-256 fingerprint of the
//! raw bytes they were built from. Loading a source whose bytes changed
//! replaces the entry; unchanged bytes reuse the ingested store.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use storefront_core::{ingest, AnalyticsResult, EventStore, IngestDiagnostics, Snapshot};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub fingerprint: String,
    pub store: Arc<EventStore>,
    pub diagnostics: Arc<IngestDiagnostics>,
}

pub struct SnapshotCache {
    entries: DashMap<String, CachedSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Hex SHA-256 of `bytes`.
    pub fn fingerprint(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Returns the cached snapshot for `source` when its fingerprint matches
    /// `bytes`, otherwise parses and ingests `bytes` and caches the result.
    pub fn load_bytes(&self, source: &str, bytes: &[u8]) -> AnalyticsResult<CachedSnapshot> {
        let fingerprint = Self::fingerprint(bytes);
        if let Some(entry) = self.entries.get(source) {
            if entry.fingerprint == fingerprint {
                metrics::counter!("snapshot_cache.hits").increment(1);
                debug!(source, "Snapshot cache hit");
                return Ok(entry.clone());
            }
        }

        metrics::counter!("snapshot_cache.misses").increment(1);
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        let (store, diagnostics) = ingest(snapshot);
        let cached = CachedSnapshot {
            fingerprint,
            store: Arc::new(store),
            diagnostics: Arc::new(diagnostics),
        };
        let replaced = self
            .entries
            .insert(source.to_string(), cached.clone())
            .is_some();
        info!(
            source,
            fingerprint = %cached.fingerprint,
            replaced,
            events = cached.store.events().len(),
            "Snapshot loaded"
        );
        Ok(cached)
    }

    /// Reads `path` and loads it under its display name.
    pub async fn load_path(&self, path: &Path) -> AnalyticsResult<CachedSnapshot> {
        let bytes = tokio::fs::read(path).await?;
        self.load_bytes(&path.display().to_string(), &bytes)
    }

    pub fn get(&self, source: &str) -> Option<CachedSnapshot> {
        self.entries.get(source).map(|entry| entry.clone())
    }

    /// Drops the entry for `source`. Returns whether one existed.
    pub fn invalidate(&self, source: &str) -> bool {
        self.entries.remove(source).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "users": [{"user_id": "u1", "registration_date": "2024-01-01"}],
        "products": [],
        "events": [
            {"event_id": "e1", "user_id": "u1", "session_id": "s1",
             "event_type": "session_start", "timestamp": "2024-01-01 10:00:00"}
        ]
    }"#;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            SnapshotCache::fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_unchanged_bytes_reuse_store() {
        let cache = SnapshotCache::new();
        let first = cache.load_bytes("snap", SNAPSHOT.as_bytes()).unwrap();
        let second = cache.load_bytes("snap", SNAPSHOT.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first.store, &second.store));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.store.events().len(), 1);
    }

    #[test]
    fn test_changed_bytes_reload() {
        let cache = SnapshotCache::new();
        let first = cache.load_bytes("snap", SNAPSHOT.as_bytes()).unwrap();
        let changed = SNAPSHOT.replace("10:00:00", "11:00:00");
        let second = cache.load_bytes("snap", changed.as_bytes()).unwrap();
        assert!(!Arc::ptr_eq(&first.store, &second.store));
        assert_ne!(first.fingerprint, second.fingerprint);
        assert_eq!(cache.get("snap").unwrap().fingerprint, second.fingerprint);
    }

    #[test]
    fn test_invalidate() {
        let cache = SnapshotCache::new();
        cache.load_bytes("snap", SNAPSHOT.as_bytes()).unwrap();
        assert!(cache.invalidate("snap"));
        assert!(!cache.invalidate("snap"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_malformed_json_is_not_cached() {
        let cache = SnapshotCache::new();
        let err = cache.load_bytes("bad", b"{not json").unwrap_err();
        assert_eq!(err.kind(), "serialization");
        assert!(cache.get("bad").is_none());
    }
}
