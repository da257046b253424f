//! Reconciliation of provider snapshots against the store
//!
//! One cycle walks the region tree parent-first (countries, cities,
//! districts, prayer times). For every entity type it fetches the tracked
//! scopes, diffs them against the persisted rows and applies one insert batch
//! and one update batch. Deletes are deferred and applied child-first once
//! every type has been upserted. A failing fetch or batch is recorded and the
//! cycle moves on.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};

use crate::config::{ProviderConfig, SyncConfig};
use crate::data::{
    City, Country, DateRange, Database, District, Entity, EntityKind, MonthWindow, PrayerTimeDay,
    QueryCache, Stored,
};
use crate::error::{Errors, Result};
use crate::metrics::{SYNC_CYCLES_TOTAL, SYNC_ROWS_TOTAL};
use crate::provider::Provider;

// =============================================================================
// Diff
// =============================================================================

/// Minimal set of changes turning a persisted snapshot into a fetched one
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<T: Entity> {
    pub inserts: Vec<T>,
    pub updates: Vec<T>,
    pub deletes: Vec<T::Key>,
}

impl<T: Entity> Default for Diff<T> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<T: Entity> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    fn absorb(&mut self, other: Diff<T>) {
        self.inserts.extend(other.inserts);
        self.updates.extend(other.updates);
        self.deletes.extend(other.deletes);
    }

    /// Drop deletes for keys that another scope still provides
    fn settle_moves(&mut self) {
        let kept: HashSet<T::Key> = self
            .inserts
            .iter()
            .chain(&self.updates)
            .map(Entity::key)
            .collect();
        self.deletes.retain(|key| !kept.contains(key));
    }
}

/// Diff `fetched` against `current` by entity key
///
/// Deletes are only produced when `complete` is set, that is when the fetch
/// for this scope succeeded as a whole. Output is ordered by key.
pub fn compute_diff<T: Entity>(fetched: &[T], current: &[T], complete: bool) -> Diff<T> {
    let current_map: BTreeMap<T::Key, &T> = current.iter().map(|e| (e.key(), e)).collect();
    let fetched_map: BTreeMap<T::Key, &T> = fetched.iter().map(|e| (e.key(), e)).collect();

    let mut diff = Diff::default();
    for (key, entity) in &fetched_map {
        match current_map.get(key) {
            None => diff.inserts.push((*entity).clone()),
            Some(existing) if *existing != *entity => diff.updates.push((*entity).clone()),
            Some(_) => {}
        }
    }

    if complete {
        diff.deletes = current_map
            .keys()
            .filter(|key| !fetched_map.contains_key(*key))
            .cloned()
            .collect();
    }

    diff
}

// =============================================================================
// Cycle report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOp {
    Insert,
    Update,
    Delete,
}

impl BatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOp::Insert => "insert",
            BatchOp::Update => "update",
            BatchOp::Delete => "delete",
        }
    }
}

/// One committed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedBatch {
    pub entity: EntityKind,
    pub operation: BatchOp,
    pub rows: u64,
}

/// Outcome of one reconciliation cycle
///
/// `applied` lists committed batches in execution order. Committed work stays
/// committed even when `errors` is non-empty.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub applied: Vec<AppliedBatch>,
    pub errors: Errors,
}

impl CycleReport {
    fn record(&mut self, entity: EntityKind, operation: BatchOp, rows: u64) {
        SYNC_ROWS_TOTAL
            .with_label_values(&[entity.as_str(), operation.as_str()])
            .inc_by(rows);
        self.applied.push(AppliedBatch {
            entity,
            operation,
            rows,
        });
    }

    /// Rows committed for one entity type and operation
    pub fn rows(&self, entity: EntityKind, operation: BatchOp) -> u64 {
        self.applied
            .iter()
            .filter(|b| b.entity == entity && b.operation == operation)
            .map(|b| b.rows)
            .sum()
    }

    pub fn total_rows(&self) -> u64 {
        self.applied.iter().map(|b| b.rows).sum()
    }

    /// Entity types whose cached snapshots no longer match the store
    ///
    /// A committed delete also stales every descendant type, since the
    /// schema cascades parent deletes.
    pub fn stale_kinds(&self) -> BTreeSet<EntityKind> {
        let mut stale = BTreeSet::new();
        for batch in self.applied.iter().filter(|b| b.rows > 0) {
            stale.insert(batch.entity);
            if batch.operation == BatchOp::Delete {
                stale.extend(EntityKind::ALL.iter().filter(|k| **k > batch.entity));
            }
        }
        stale
    }

    pub fn into_result(self) -> Result<Vec<AppliedBatch>> {
        self.errors.into_result(self.applied)
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Which scopes a cycle covers
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Countries whose cities and districts are synced; empty means all
    pub country_ids: Vec<i64>,
    /// Districts whose prayer times are synced besides those already stored
    pub district_ids: Vec<i64>,
    /// Calendar months of prayer times per district
    pub months: u32,
    /// Maximum scope fetches in flight
    pub concurrency: usize,
}

impl ReconcileSettings {
    pub fn from_config(sync: &SyncConfig, provider: &ProviderConfig) -> Self {
        Self {
            country_ids: sync.country_ids.clone(),
            district_ids: sync.district_ids.clone(),
            months: sync.months,
            concurrency: provider.concurrency,
        }
    }
}

/// Deletes collected during a cycle, applied child-first at the end
#[derive(Default)]
struct PendingDeletes {
    countries: Vec<i64>,
    cities: Vec<i64>,
    districts: Vec<i64>,
    prayer_times: Vec<(i64, NaiveDate)>,
}

type ScopeFetch<T> = (Option<i64>, Result<Vec<T>>);

pub struct Reconciler {
    db: Arc<Database>,
    provider: Arc<dyn Provider>,
    cache: Arc<QueryCache>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn Provider>,
        cache: Arc<QueryCache>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            db,
            provider,
            cache,
            settings,
        }
    }

    /// Run one cycle for the current date
    pub async fn reconcile(&self) -> CycleReport {
        self.reconcile_at(Utc::now().date_naive()).await
    }

    /// Run one cycle with the prayer-time window anchored at `today`
    pub async fn reconcile_at(&self, today: NaiveDate) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut deletes = PendingDeletes::default();

        self.sync_tree(today, &mut report, &mut deletes).await;
        self.apply_deletes(deletes, &mut report).await;

        for kind in report.stale_kinds() {
            self.cache.invalidate(kind);
        }

        let status = if report.errors.is_empty() { "success" } else { "partial" };
        SYNC_CYCLES_TOTAL.with_label_values(&[status]).inc();
        tracing::info!(
            status,
            batches = report.applied.len(),
            rows = report.total_rows(),
            errors = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reconciliation cycle finished"
        );

        report
    }

    /// Upsert every level parent-first; stops descending when a level's
    /// persisted snapshot cannot be read
    async fn sync_tree(
        &self,
        today: NaiveDate,
        report: &mut CycleReport,
        deletes: &mut PendingDeletes,
    ) {
        // Countries
        let fetched = vec![(None, self.provider.fetch_countries().await)];
        let Some((countries, removed)) = self.sync_regions::<Country>(fetched, None, report).await
        else {
            return;
        };
        deletes.countries = removed;

        // Cities
        let tracked_countries: Vec<i64> = if self.settings.country_ids.is_empty() {
            countries.keys().copied().collect()
        } else {
            self.settings
                .country_ids
                .iter()
                .copied()
                .filter(|id| {
                    let known = countries.contains_key(id);
                    if !known {
                        report.errors.absorb(
                            Errors::invalid_input(format!("configured country {id} is not known"))
                                .with_context("countryId", id),
                        );
                    }
                    known
                })
                .collect()
        };
        let fetched = self
            .fetch_scopes(&tracked_countries, |id| self.provider.fetch_cities(id))
            .await;
        let parents: HashSet<i64> = countries.keys().copied().collect();
        let Some((cities, removed)) = self
            .sync_regions::<City>(fetched, Some(&parents), report)
            .await
        else {
            return;
        };
        deletes.cities = removed;

        // Districts
        let tracked_countries: HashSet<i64> = tracked_countries.into_iter().collect();
        let tracked_cities: Vec<i64> = cities
            .values()
            .filter(|city| tracked_countries.contains(&city.country_id))
            .map(|city| city.id)
            .collect();
        let fetched = self
            .fetch_scopes(&tracked_cities, |id| self.provider.fetch_districts(id))
            .await;
        let parents: HashSet<i64> = cities.keys().copied().collect();
        let Some((districts, removed)) = self
            .sync_regions::<District>(fetched, Some(&parents), report)
            .await
        else {
            return;
        };
        deletes.districts = removed;

        // Prayer times
        let window = MonthWindow::starting(today, self.settings.months);
        let known: HashSet<i64> = districts.keys().copied().collect();
        let tracked_cities: HashSet<i64> = tracked_cities.into_iter().collect();
        let tracked = self
            .tracked_districts(&districts, &tracked_cities, report)
            .await;
        let fetched = self
            .fetch_scopes(&tracked, |id| self.provider.fetch_prayer_times(id, window))
            .await;
        deletes.prayer_times = self.sync_prayer_times(fetched, &known, report).await;
    }

    /// Fetch every scope with bounded concurrency, keeping scope order
    async fn fetch_scopes<T, F, Fut>(&self, scopes: &[i64], fetch: F) -> Vec<ScopeFetch<T>>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        stream::iter(scopes.iter().copied())
            .map(|scope| {
                let pending = fetch(scope);
                async move { (Some(scope), pending.await) }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    /// Reconcile one region level
    ///
    /// Returns the persisted snapshot after upserts, keyed by id, and the
    /// keys to delete at the end of the cycle.
    async fn sync_regions<T>(
        &self,
        fetched: Vec<ScopeFetch<T>>,
        parents: Option<&HashSet<i64>>,
        report: &mut CycleReport,
    ) -> Option<(BTreeMap<i64, T>, Vec<i64>)>
    where
        T: Stored<Key = i64>,
    {
        let current = match self.db.load_all::<T>().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(entity = %T::KIND, error = %e, "Cannot load snapshot; skipping level");
                report.errors.absorb(e);
                return None;
            }
        };

        let mut by_scope: HashMap<Option<i64>, Vec<T>> = HashMap::new();
        for row in &current {
            by_scope.entry(row.scope()).or_default().push(row.clone());
        }

        let diff = diff_scopes(fetched, &by_scope, &mut report.errors);
        let committed = self.apply_upserts(diff.inserts, diff.updates, parents, report).await;

        let mut persisted: BTreeMap<i64, T> = current.into_iter().map(|e| (e.key(), e)).collect();
        persisted.extend(committed.into_iter().map(|e| (e.key(), e)));

        Some((persisted, diff.deletes))
    }

    /// Districts whose prayer times are synced: stored ones plus configured
    ///
    /// With no configured ids, every district of a tracked city is synced.
    async fn tracked_districts(
        &self,
        districts: &BTreeMap<i64, District>,
        tracked_cities: &HashSet<i64>,
        report: &mut CycleReport,
    ) -> Vec<i64> {
        let mut tracked: BTreeSet<i64> = match self.db.tracked_districts().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                report.errors.absorb(e);
                BTreeSet::new()
            }
        };

        if self.settings.district_ids.is_empty() {
            tracked.extend(
                districts
                    .values()
                    .filter(|district| tracked_cities.contains(&district.city_id))
                    .map(|district| district.id),
            );
            return tracked.into_iter().collect();
        }

        for id in &self.settings.district_ids {
            if districts.contains_key(id) {
                tracked.insert(*id);
            } else {
                report.errors.absorb(
                    Errors::invalid_input(format!("configured district {id} is not known"))
                        .with_context("districtId", id),
                );
            }
        }

        tracked.into_iter().collect()
    }

    /// Reconcile prayer times; returns keys to delete
    ///
    /// Stored days are only compared inside the span the fetched table
    /// covers, so days the provider no longer lists before its first row
    /// are left to the broom.
    async fn sync_prayer_times(
        &self,
        fetched: Vec<ScopeFetch<PrayerTimeDay>>,
        districts: &HashSet<i64>,
        report: &mut CycleReport,
    ) -> Vec<(i64, NaiveDate)> {
        let mut by_scope = HashMap::new();
        let mut usable = Vec::with_capacity(fetched.len());
        for (scope, result) in fetched {
            let Some(district_id) = scope else { continue };
            let span = result.as_ref().ok().and_then(|days| covered_span(days));
            if let Some(span) = span {
                match self.db.prayer_times_between(district_id, span).await {
                    Ok(rows) => {
                        by_scope.insert(scope, rows);
                    }
                    Err(e) => {
                        report.errors.absorb(e.with_context("districtId", district_id));
                        continue;
                    }
                }
            }
            usable.push((scope, result));
        }

        let diff = diff_scopes(usable, &by_scope, &mut report.errors);
        self.apply_upserts(diff.inserts, diff.updates, Some(districts), report)
            .await;
        diff.deletes
    }

    /// Insert batch then update batch, after dropping orphans
    ///
    /// Returns the items that were committed.
    async fn apply_upserts<T: Stored>(
        &self,
        inserts: Vec<T>,
        updates: Vec<T>,
        parents: Option<&HashSet<i64>>,
        report: &mut CycleReport,
    ) -> Vec<T> {
        let (inserts, updates) = match parents {
            Some(parents) => (
                exclude_orphans(inserts, parents, &mut report.errors),
                exclude_orphans(updates, parents, &mut report.errors),
            ),
            None => (inserts, updates),
        };

        let mut committed = self.apply_batch(BatchOp::Insert, inserts, report).await;
        committed.extend(self.apply_batch(BatchOp::Update, updates, report).await);
        committed
    }

    async fn apply_batch<T: Stored>(
        &self,
        operation: BatchOp,
        items: Vec<T>,
        report: &mut CycleReport,
    ) -> Vec<T> {
        if items.is_empty() {
            return items;
        }

        match self.db.upsert_batch(&items).await {
            Ok(rows) => {
                tracing::debug!(entity = %T::KIND, operation = operation.as_str(), rows, "Batch committed");
                report.record(T::KIND, operation, rows);
                items
            }
            Err(e) => {
                report.errors.absorb(e);
                Vec::new()
            }
        }
    }

    /// Apply deferred deletes child-first
    async fn apply_deletes(&self, deletes: PendingDeletes, report: &mut CycleReport) {
        self.delete_batch::<PrayerTimeDay>(deletes.prayer_times, report)
            .await;
        self.delete_batch::<District>(deletes.districts, report).await;
        self.delete_batch::<City>(deletes.cities, report).await;
        self.delete_batch::<Country>(deletes.countries, report).await;
    }

    async fn delete_batch<T: Stored>(&self, keys: Vec<T::Key>, report: &mut CycleReport) {
        if keys.is_empty() {
            return;
        }

        match self.db.delete_batch::<T>(&keys).await {
            Ok(rows) => {
                tracing::info!(entity = %T::KIND, rows, "Removed entities missing from provider");
                report.record(T::KIND, BatchOp::Delete, rows);
            }
            Err(e) => report.errors.absorb(e),
        }
    }
}

/// Diff every fetched scope against its persisted rows
///
/// A failed fetch contributes its error and nothing else.
fn diff_scopes<T: Entity>(
    fetched: Vec<ScopeFetch<T>>,
    current: &HashMap<Option<i64>, Vec<T>>,
    errors: &mut Errors,
) -> Diff<T> {
    let mut diff = Diff::default();
    for (scope, result) in fetched {
        let existing = current.get(&scope).map(Vec::as_slice).unwrap_or(&[]);
        match result {
            Ok(rows) => diff.absorb(compute_diff(&rows, existing, true)),
            Err(e) => {
                tracing::warn!(entity = %T::KIND, ?scope, error = %e, "Fetch failed; scope left untouched");
                let e = match scope {
                    Some(scope) => e.with_context("scope", scope),
                    None => e,
                };
                errors.absorb(e.with_context("entity", T::KIND));
                diff.absorb(compute_diff(&[], existing, false));
            }
        }
    }

    diff.settle_moves();
    tracing::debug!(
        entity = %T::KIND,
        inserts = diff.inserts.len(),
        updates = diff.updates.len(),
        deletes = diff.deletes.len(),
        "Computed diff"
    );
    diff
}

/// First to last fetched date, or `None` for an empty table
fn covered_span(days: &[PrayerTimeDay]) -> Option<DateRange> {
    let from = days.iter().map(|day| day.date).min()?;
    let to = days.iter().map(|day| day.date).max()?;
    Some(DateRange { from, to })
}

/// Keep items whose parent is persisted; report the rest
fn exclude_orphans<T: Entity>(items: Vec<T>, parents: &HashSet<i64>, errors: &mut Errors) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| match item.scope() {
            Some(parent) if !parents.contains(&parent) => {
                errors.absorb(
                    Errors::invalid_input(format!(
                        "orphaned {} {:?}: parent {parent} does not exist",
                        T::KIND,
                        item.key()
                    ))
                    .with_context("entity", T::KIND),
                );
                false
            }
            _ => true,
        })
        .collect()
}
