//! Content-addressed prediction cache.
//!
//! [`PredictionCache`] maps a request [`Fingerprint`] to a previously
//! computed result. Entries are immutable once published (moka inserts are
//! atomic — a reader never sees a partially constructed value), carry their
//! own TTL, and are tagged with the model version they were computed under.
//!
//! # Servability
//!
//! An entry is served only if its TTL has not elapsed AND its model version
//! still matches the active version for its model. Both checks happen on
//! every read — this lazy check is the primary staleness guarantee. The
//! eager sweep in [`PredictionCache::invalidate`] is an optimization that
//! reclaims memory sooner; correctness never depends on it.
//!
//! # Bounds
//!
//! Capacity is bounded by `max_entries`; moka evicts least-recently-used
//! entries beyond the bound. TTL-expired entries are removed at read time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use super::fingerprint::Fingerprint;
use crate::telemetry;
use crate::types::ModelVersion;

/// Result of a cache lookup. A sentinel, not an error — expired, stale,
/// and corrupt entries all surface as `Miss`.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<Value>),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// One cached prediction. Never mutated after insert.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    model: String,
    model_version: ModelVersion,
    stored_at: Instant,
    ttl: Duration,
}

/// Bounded, version-aware store for computed predictions.
pub struct PredictionCache {
    entries: moka::sync::Cache<Fingerprint, CacheEntry>,
    /// Model name → currently active version. Entries tagged with any other
    /// version are unservable.
    versions: RwLock<HashMap<String, ModelVersion>>,
}

impl PredictionCache {
    /// Create a cache bounded to `max_entries`.
    pub fn new(max_entries: u64) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(max_entries)
            .support_invalidation_closures()
            .build();
        Self {
            entries,
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a servable entry for `fingerprint`.
    ///
    /// `endpoint` labels the hit/miss metrics only.
    pub fn lookup(&self, endpoint: &str, fingerprint: &Fingerprint) -> Lookup {
        let Some(entry) = self.entries.get(fingerprint) else {
            return self.miss(endpoint);
        };

        let now = Instant::now();
        // stored_at is monotonic, so a future timestamp means the entry is
        // corrupt. Self-heal by recomputation — drop it, report a miss.
        if entry.stored_at > now {
            warn!(%fingerprint, "discarding corrupt cache entry");
            metrics::counter!(telemetry::CACHE_CORRUPTIONS_TOTAL).increment(1);
            self.entries.invalidate(fingerprint);
            return self.miss(endpoint);
        }

        if now.saturating_duration_since(entry.stored_at) >= entry.ttl {
            self.entries.invalidate(fingerprint);
            return self.miss(endpoint);
        }

        if self.active_version(&entry.model) != entry.model_version {
            metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(1);
            self.entries.invalidate(fingerprint);
            return self.miss(endpoint);
        }

        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "endpoint" => endpoint.to_owned())
            .increment(1);
        Lookup::Hit(Arc::clone(&entry.value))
    }

    /// Publish a computed result.
    ///
    /// Called only on backend success; the entry is fully materialized
    /// before it becomes visible to any reader.
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        value: Arc<Value>,
        model: impl Into<String>,
        model_version: ModelVersion,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            value,
            model: model.into(),
            model_version,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.insert(fingerprint, entry);
    }

    /// Currently active version for `model` (`ModelVersion::default()` when
    /// none has been registered).
    pub fn active_version(&self, model: &str) -> ModelVersion {
        self.versions_read().get(model).cloned().unwrap_or_default()
    }

    /// Register the active version for `model` without sweeping.
    ///
    /// Used at startup to seed versions; stale entries are still caught by
    /// the lazy read-time check.
    pub fn set_active_version(&self, model: impl Into<String>, version: ModelVersion) {
        self.versions_write().insert(model.into(), version);
    }

    /// Apply a model version change.
    ///
    /// Bumps the active version (the guarantee — mismatched entries stop
    /// being servable on their next read) and eagerly sweeps entries tagged
    /// with any other version of `model` (the optimization).
    pub fn invalidate(&self, model: &str, new_version: ModelVersion) {
        let previous = self
            .versions_write()
            .insert(model.to_string(), new_version.clone());
        info!(
            model,
            from = previous.as_ref().map(ModelVersion::as_str),
            to = new_version.as_str(),
            "model version changed, invalidating stale entries"
        );

        let swept_model = model.to_string();
        if let Err(e) = self.entries.invalidate_entries_if(move |_, entry| {
            entry.model == swept_model && entry.model_version != new_version
        }) {
            // The lazy version check still protects reads; the sweep is
            // only a memory optimization.
            warn!(error = %e, "eager invalidation sweep unavailable");
        }
    }

    /// Number of entries currently resident (including not-yet-evicted
    /// expired ones).
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    fn versions_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModelVersion>> {
        // A poisoned lock only means a writer panicked mid-insert; the map
        // itself is still coherent.
        self.versions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn versions_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ModelVersion>> {
        self.versions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn miss(&self, endpoint: &str) -> Lookup {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "endpoint" => endpoint.to_owned())
            .increment(1);
        Lookup::Miss
    }
}
