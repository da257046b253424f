//! In-memory caches
//!
//! These caches are volatile and cleared on restart.
//! Uses Moka for concurrent read-through caching of store snapshots.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use super::models::*;
use crate::error::{Errors, Result};
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SIZE};

// =============================================================================
// Snapshot Cache
// =============================================================================

/// Read-through cache of one entity type, keyed by parent scope
///
/// `None` is the key of the whole table (countries). A miss blocks on the
/// loader; concurrent misses for the same key share a single load.
pub struct SnapshotCache<T: Entity> {
    entries: Cache<Option<i64>, Arc<Vec<T>>>,
}

impl<T: Entity> SnapshotCache<T> {
    /// Create new snapshot cache
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of scopes to keep
    /// * `ttl` - Age after which an entry is reloaded regardless of syncs
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { entries }
    }

    /// Get the snapshot of `scope`, loading it with `load` on a miss
    ///
    /// A failed load is returned as is and nothing is cached.
    pub async fn get_or_load<F, Fut>(&self, scope: Option<i64>, load: F) -> Result<Arc<Vec<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let label = T::KIND.as_str();

        if let Some(hit) = self.entries.get(&scope).await {
            CACHE_HITS_TOTAL.with_label_values(&[label]).inc();
            return Ok(hit);
        }
        CACHE_MISSES_TOTAL.with_label_values(&[label]).inc();

        let loaded = self
            .entries
            .try_get_with(scope, async move { load().await.map(Arc::new) })
            .await
            .map_err(|e: Arc<Errors>| (*e).clone())?;

        CACHE_SIZE
            .with_label_values(&[label])
            .set(self.entries.entry_count() as i64);

        Ok(loaded)
    }

    /// Drop every scope of this entity type
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Apply pending evictions and refresh the size gauge
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
        CACHE_SIZE
            .with_label_values(&[T::KIND.as_str()])
            .set(self.entries.entry_count() as i64);
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

// =============================================================================
// Query Cache
// =============================================================================

/// One snapshot cache per entity type
pub struct QueryCache {
    pub countries: SnapshotCache<Country>,
    pub cities: SnapshotCache<City>,
    pub districts: SnapshotCache<District>,
    pub prayer_times: SnapshotCache<PrayerTimeDay>,
}

impl QueryCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            countries: SnapshotCache::new(max_entries, ttl),
            cities: SnapshotCache::new(max_entries, ttl),
            districts: SnapshotCache::new(max_entries, ttl),
            prayer_times: SnapshotCache::new(max_entries, ttl),
        }
    }

    /// Invalidate every cached snapshot of `kind`
    ///
    /// Takes effect immediately: the next read of that kind goes to the store.
    pub fn invalidate(&self, kind: EntityKind) {
        match kind {
            EntityKind::Country => self.countries.invalidate_all(),
            EntityKind::City => self.cities.invalidate_all(),
            EntityKind::District => self.districts.invalidate_all(),
            EntityKind::PrayerTime => self.prayer_times.invalidate_all(),
        }
        tracing::debug!(entity = %kind, "Cache invalidated");
    }

    /// Run maintenance on every cache so expired entries are evicted
    pub async fn run_pending_tasks(&self) {
        self.countries.run_pending_tasks().await;
        self.cities.run_pending_tasks().await;
        self.districts.run_pending_tasks().await;
        self.prayer_times.run_pending_tasks().await;
    }
}
