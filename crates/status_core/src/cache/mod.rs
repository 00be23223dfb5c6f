//! Read-through cache for computed metrics.
//!
//! - structured keys (`CacheKey`), no string patterns
//! - keys carry the window end, so reads anchored at different times never share an entry
//! - TTL-based freshness; expired entries stay available as stale fallbacks until invalidated
//! - explicit per-scope registry drives invalidation
//! - generation counter rejects results computed before an invalidation
//! - store failures degrade to misses, never to failed reads
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::aggregate::SystemUptime;
use crate::config::{CacheConfig, CalculationMode};
use crate::domain::AggregatedDailySummary;
use crate::error::AppError;
use crate::timeline::DailyTimeline;
use crate::uptime::{ComponentUptime, SlaReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    Component(i64),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Uptime,
    Timeline,
    Sla,
    Aggregate,
    SystemUptime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub scope: CacheScope,
    pub days: u32,
    pub mode: CalculationMode,
    pub kind: MetricKind,
    /// End of the covered window: a unix minute for rolling windows, a Julian day for
    /// calendar-day results.
    pub anchor: i64,
}

impl CacheKey {
    /// Same read at a possibly different anchor.
    fn same_series(&self, other: &CacheKey) -> bool {
        self.scope == other.scope
            && self.days == other.days
            && self.mode == other.mode
            && self.kind == other.kind
    }
}

/// What a mutation-side collaborator changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invalidation {
    /// A component's status changed: its own entries and every cross-component entry.
    Component(i64),
    /// Incident correlation changed (e.g. resolution): every daily timeline.
    Incidents,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Uptime(ComponentUptime),
    Timeline(DailyTimeline),
    Sla(SlaReport),
    Aggregate(Vec<AggregatedDailySummary>),
    SystemUptime(SystemUptime),
}

/// Result types that can live in the cache.
pub trait Cacheable: Clone + Sized {
    fn into_cached(self) -> CachedValue;
    fn from_cached(value: CachedValue) -> Option<Self>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn into_cached(self) -> CachedValue {
                CachedValue::$variant(self)
            }

            fn from_cached(value: CachedValue) -> Option<Self> {
                match value {
                    CachedValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(ComponentUptime, Uptime);
cacheable!(DailyTimeline, Timeline);
cacheable!(SlaReport, Sla);
cacheable!(Vec<AggregatedDailySummary>, Aggregate);
cacheable!(SystemUptime, SystemUptime);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub computed_at: Instant,
}

/// Backing store. In-process by default; an external cache service can implement this.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AppError>;
    fn save(&self, key: CacheKey, entry: CacheEntry) -> Result<(), AppError>;
    fn remove(&self, key: &CacheKey) -> Result<(), AppError>;
    fn clear(&self) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryCacheStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| AppError::new("CACHE_UNAVAILABLE", "Cache store lock is poisoned"))
    }
}

impl CacheStore for InMemoryCacheStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, key: CacheKey, entry: CacheEntry) -> Result<(), AppError> {
        self.lock()?.insert(key, entry);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), AppError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_seconds: u64,
}

pub struct MetricsCache {
    store: Box<dyn CacheStore>,
    registry: Mutex<HashMap<CacheScope, HashSet<CacheKey>>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl: Duration,
    enabled: bool,
    tracked_windows: Vec<u32>,
}

impl MetricsCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_store(config, Box::new(InMemoryCacheStore::default()))
    }

    pub fn with_store(config: &CacheConfig, store: Box<dyn CacheStore>) -> Self {
        Self {
            store,
            registry: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl: Duration::from_secs(config.duration_seconds),
            enabled: config.enabled,
            tracked_windows: config.tracked_windows.clone(),
        }
    }

    /// Key for a read, or `None` when the cache is off or the window is not tracked.
    pub fn key_for(
        &self,
        scope: CacheScope,
        days: u32,
        mode: CalculationMode,
        kind: MetricKind,
        anchor: i64,
    ) -> Option<CacheKey> {
        (self.enabled && self.tracked_windows.contains(&days)).then_some(CacheKey {
            scope,
            days,
            mode,
            kind,
            anchor,
        })
    }

    /// Snapshot to pass back to `put`; a put is dropped if an invalidation happened since.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn load<T: Cacheable>(&self, key: &CacheKey) -> Option<(T, Duration)> {
        match self.store.load(key) {
            Ok(Some(entry)) => {
                let age = entry.computed_at.elapsed();
                T::from_cached(entry.value).map(|v| (v, age))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, ?key, "cache load failed; computing directly");
                None
            }
        }
    }

    /// Value younger than the TTL.
    pub fn get<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        match self.load::<T>(key) {
            Some((value, age)) if age < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?key, "metrics cache hit");
                Some(value)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?key, "metrics cache miss");
                None
            }
        }
    }

    /// Any value still present regardless of age, falling back to the same read at an earlier
    /// anchor.
    pub fn get_stale<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        if let Some((value, _)) = self.load::<T>(key) {
            return Some(value);
        }
        let sibling = self.registry.lock().ok().and_then(|registry| {
            registry
                .get(&key.scope)?
                .iter()
                .find(|k| k.same_series(key))
                .copied()
        })?;
        self.load::<T>(&sibling).map(|(value, _)| value)
    }

    pub fn put<T: Cacheable>(&self, key: CacheKey, value: &T, generation: u64) {
        let Ok(mut registry) = self.registry.lock() else {
            tracing::warn!(?key, "cache registry unavailable; result not cached");
            return;
        };
        // Checked under the registry lock, which `invalidate` also holds while bumping it.
        if self.generation() != generation {
            tracing::debug!(?key, "dropping result computed before an invalidation");
            return;
        }
        let entry = CacheEntry {
            value: value.clone().into_cached(),
            computed_at: Instant::now(),
        };
        if let Err(e) = self.store.save(key, entry) {
            tracing::warn!(error = %e, ?key, "cache save failed");
            return;
        }
        // One anchor per series: the newest put replaces the others.
        let scoped = registry.entry(key.scope).or_default();
        let superseded: Vec<CacheKey> = scoped
            .iter()
            .filter(|k| k.same_series(&key) && k.anchor != key.anchor)
            .copied()
            .collect();
        for old in &superseded {
            scoped.remove(old);
            if let Err(e) = self.store.remove(old) {
                tracing::warn!(error = %e, key = ?old, "cache remove failed");
            }
        }
        scoped.insert(key);
    }

    pub fn invalidate(&self, target: Invalidation) {
        let mut registry = match self.registry.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        let doomed: Vec<CacheKey> = match target {
            Invalidation::Component(id) => [CacheScope::Component(id), CacheScope::All]
                .iter()
                .filter_map(|scope| registry.remove(scope))
                .flatten()
                .collect(),
            Invalidation::Incidents => {
                let mut keys = Vec::new();
                for scoped in registry.values_mut() {
                    scoped.retain(|k| {
                        let timeline = k.kind == MetricKind::Timeline;
                        if timeline {
                            keys.push(*k);
                        }
                        !timeline
                    });
                }
                keys
            }
            Invalidation::All => {
                registry.clear();
                if let Err(e) = self.store.clear() {
                    tracing::warn!(error = %e, "cache clear failed");
                }
                Vec::new()
            }
        };

        for key in &doomed {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(error = %e, ?key, "cache remove failed");
            }
        }
        tracing::info!(?target, removed = doomed.len(), "metrics cache invalidated");
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .registry
            .lock()
            .map(|r| r.values().map(HashSet::len).sum::<usize>())
            .unwrap_or(0);
        CacheStats {
            enabled: self.enabled,
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{empty_minutes, DataIntegrity};
    use std::thread;
    use time::macros::datetime;

    fn uptime(component_id: i64, pct: f64) -> ComponentUptime {
        ComponentUptime {
            component_id,
            uptime_percentage: pct,
            total_minutes: 10080,
            minutes_by_status: empty_minutes(),
            downtime_minutes: 0,
            period_start: datetime!(2026-01-01 00:00 UTC),
            period_end: datetime!(2026-01-08 00:00 UTC),
            calculation_mode: CalculationMode::Weighted,
            integrity: DataIntegrity::default(),
        }
    }

    fn cache(ttl_seconds: u64) -> MetricsCache {
        MetricsCache::new(&CacheConfig {
            enabled: true,
            duration_seconds: ttl_seconds,
            tracked_windows: vec![7, 30],
        })
    }

    const ANCHOR: i64 = 29_620_800;

    fn key(cache: &MetricsCache, scope: CacheScope, kind: MetricKind) -> CacheKey {
        cache
            .key_for(scope, 7, CalculationMode::Weighted, kind, ANCHOR)
            .expect("tracked")
    }

    #[test]
    fn test_cache_hit() {
        let cache = cache(60);
        let k = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        cache.put(k, &uptime(1, 99.5), cache.generation());

        let hit: Option<ComponentUptime> = cache.get(&k);
        assert_eq!(hit.map(|u| u.uptime_percentage), Some(99.5));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn untracked_window_has_no_key() {
        let cache = cache(60);
        assert!(cache
            .key_for(
                CacheScope::All,
                14,
                CalculationMode::Weighted,
                MetricKind::Aggregate,
                ANCHOR,
            )
            .is_none());
    }

    #[test]
    fn different_anchors_do_not_share_an_entry() {
        let cache = cache(60);
        let earlier = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        let later = CacheKey {
            anchor: ANCHOR + 60,
            ..earlier
        };
        cache.put(earlier, &uptime(1, 100.0), cache.generation());

        assert!(cache.get::<ComponentUptime>(&later).is_none());
        // The earlier anchor is still served as a stale fallback.
        assert_eq!(
            cache
                .get_stale::<ComponentUptime>(&later)
                .map(|u| u.uptime_percentage),
            Some(100.0)
        );

        cache.put(later, &uptime(1, 0.0), cache.generation());
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get::<ComponentUptime>(&earlier).is_none());
        assert_eq!(
            cache.get::<ComponentUptime>(&later).map(|u| u.uptime_percentage),
            Some(0.0)
        );
    }

    #[test]
    fn test_cache_expiration_keeps_stale_value() {
        let cache = cache(1);
        let k = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        cache.put(k, &uptime(1, 97.0), cache.generation());
        assert!(cache.get::<ComponentUptime>(&k).is_some());

        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get::<ComponentUptime>(&k).is_none());
        assert!(cache.get_stale::<ComponentUptime>(&k).is_some());
    }

    #[test]
    fn component_invalidation_spares_other_components() {
        let cache = cache(60);
        let mine = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        let other = key(&cache, CacheScope::Component(2), MetricKind::Uptime);
        let all = key(&cache, CacheScope::All, MetricKind::Aggregate);
        let g = cache.generation();
        cache.put(mine, &uptime(1, 90.0), g);
        cache.put(other, &uptime(2, 91.0), g);
        cache.put(all, &Vec::<AggregatedDailySummary>::new(), g);

        cache.invalidate(Invalidation::Component(1));

        assert!(cache.get_stale::<ComponentUptime>(&mine).is_none());
        assert!(cache.get_stale::<Vec<AggregatedDailySummary>>(&all).is_none());
        assert!(cache.get::<ComponentUptime>(&other).is_some());
    }

    #[test]
    fn put_after_invalidation_is_dropped() {
        let cache = cache(60);
        let k = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        let before = cache.generation();
        cache.invalidate(Invalidation::Component(1));
        cache.put(k, &uptime(1, 50.0), before);
        assert!(cache.get_stale::<ComponentUptime>(&k).is_none());
    }

    #[test]
    fn incident_invalidation_only_touches_timelines() {
        let cache = cache(60);
        let up = key(&cache, CacheScope::Component(1), MetricKind::Uptime);
        let tl = key(&cache, CacheScope::Component(1), MetricKind::Timeline);
        let g = cache.generation();
        cache.put(up, &uptime(1, 90.0), g);
        cache.put(
            tl,
            &DailyTimeline {
                component_id: 1,
                days: Vec::new(),
                integrity: DataIntegrity::default(),
            },
            g,
        );

        cache.invalidate(Invalidation::Incidents);

        assert!(cache.get_stale::<DailyTimeline>(&tl).is_none());
        assert!(cache.get::<ComponentUptime>(&up).is_some());
    }

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn load(&self, _: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
            Err(AppError::new("CACHE_UNAVAILABLE", "down"))
        }
        fn save(&self, _: CacheKey, _: CacheEntry) -> Result<(), AppError> {
            Err(AppError::new("CACHE_UNAVAILABLE", "down"))
        }
        fn remove(&self, _: &CacheKey) -> Result<(), AppError> {
            Err(AppError::new("CACHE_UNAVAILABLE", "down"))
        }
        fn clear(&self) -> Result<(), AppError> {
            Err(AppError::new("CACHE_UNAVAILABLE", "down"))
        }
    }

    #[test]
    fn broken_store_behaves_as_a_miss() {
        let cache = MetricsCache::with_store(&CacheConfig::default(), Box::new(BrokenStore));
        let k = cache
            .key_for(
                CacheScope::Component(1),
                7,
                CalculationMode::Weighted,
                MetricKind::Uptime,
                ANCHOR,
            )
            .unwrap();
        cache.put(k, &uptime(1, 80.0), cache.generation());
        assert!(cache.get::<ComponentUptime>(&k).is_none());
        cache.invalidate(Invalidation::All);
        assert_eq!(cache.stats().entries, 0);
    }
}
