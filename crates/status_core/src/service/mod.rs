use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::aggregate::{
    aggregate_daily, collect_histories, system_uptime, ComponentHistory, SystemUptime,
};
use crate::cache::{
    CacheKey, CacheScope, CacheStats, Cacheable, Invalidation, MetricKind, MetricsCache,
};
use crate::config::MetricsConfig;
use crate::domain::{AggregatedDailySummary, Component, StatusChange, StatusEvent, Window};
use crate::error::AppError;
use crate::store::EventStore;
use crate::timeline::DailyTimeline;
use crate::uptime::{sla_report, ComponentUptime, SlaReport};

/// Longest window accepted by the read operations.
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// A read result and whether it came from an expired cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Served<T> {
    pub value: T,
    pub stale: bool,
}

impl<T> Served<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            stale: false,
        }
    }
}

/// Entry point used by the presentation layer and by mutation-side collaborators.
pub struct MetricsService<S> {
    store: Arc<S>,
    config: Arc<MetricsConfig>,
    cache: Arc<MetricsCache>,
}

impl<S> Clone for MetricsService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            cache: Arc::clone(&self.cache),
        }
    }
}

fn validate_days(days: u32) -> Result<(), AppError> {
    if days > MAX_WINDOW_DAYS {
        return Err(AppError::new(
            "VALIDATION_WINDOW_INVALID",
            format!("Window must be at most {MAX_WINDOW_DAYS} days"),
        )
        .with_details(format!("days={days}")));
    }
    Ok(())
}

fn day_range(days: u32, now: OffsetDateTime) -> (Date, Date) {
    ((now - Duration::days(days as i64)).date(), now.date())
}

/// Rolling windows end on a whole minute, so reads within the same minute share a cache entry.
fn minute_floor(now: OffsetDateTime) -> OffsetDateTime {
    let into_minute = now.unix_timestamp_nanos().rem_euclid(60_000_000_000);
    now - Duration::nanoseconds(into_minute as i64)
}

/// End of the window a read covers: the unix minute for rolling windows, the Julian day for
/// calendar-day results.
fn window_anchor(kind: MetricKind, now: OffsetDateTime) -> i64 {
    match kind {
        MetricKind::Timeline | MetricKind::Aggregate => now.date().to_julian_day() as i64,
        MetricKind::Uptime | MetricKind::Sla | MetricKind::SystemUptime => {
            now.unix_timestamp().div_euclid(60)
        }
    }
}

impl<S: EventStore + 'static> MetricsService<S> {
    pub fn new(store: S, config: MetricsConfig) -> Result<Self, AppError> {
        let cache = MetricsCache::new(&config.cache);
        Self::with_cache(Arc::new(store), config, cache)
    }

    pub fn with_cache(
        store: Arc<S>,
        config: MetricsConfig,
        cache: MetricsCache,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            cache: Arc::new(cache),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn key(
        &self,
        scope: CacheScope,
        days: u32,
        kind: MetricKind,
        now: OffsetDateTime,
    ) -> Option<CacheKey> {
        self.cache.key_for(
            scope,
            days,
            self.config.calculation_mode,
            kind,
            window_anchor(kind, now),
        )
    }

    fn read_through<T: Cacheable>(
        &self,
        key: Option<CacheKey>,
        compute: impl FnOnce() -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let Some(key) = key else { return compute() };
        if let Some(hit) = self.cache.get::<T>(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let value = compute()?;
        self.cache.put(key, &value, generation);
        Ok(value)
    }

    /// Compute on a worker; past `timeout`, serve whatever the cache still holds.
    ///
    /// The worker keeps running after a timeout and caches its result for later readers.
    fn read_with_timeout<T, F>(
        &self,
        key: Option<CacheKey>,
        timeout: StdDuration,
        compute: F,
    ) -> Result<Served<T>, AppError>
    where
        T: Cacheable + Send + 'static,
        F: FnOnce(&Self) -> Result<T, AppError> + Send + 'static,
    {
        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get::<T>(k)) {
            return Ok(Served::fresh(hit));
        }

        let generation = self.cache.generation();
        let worker = self.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = compute(&worker);
            if let (Some(key), Ok(value)) = (key, &result) {
                worker.cache.put(key, value, generation);
            }
            // The reader may have stopped waiting.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map(Served::fresh),
            Err(RecvTimeoutError::Timeout) => {
                match key.as_ref().and_then(|k| self.cache.get_stale::<T>(k)) {
                    Some(value) => {
                        tracing::warn!(
                            ?key,
                            ?timeout,
                            "metrics read timed out; serving stale value"
                        );
                        Ok(Served { value, stale: true })
                    }
                    None => Err(AppError::new(
                        "METRICS_TIMEOUT",
                        "Metrics computation exceeded the caller's timeout",
                    )
                    .with_details(format!("timeout_ms={}", timeout.as_millis()))
                    .with_retryable(true)),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(AppError::new(
                "METRICS_WORKER_FAILED",
                "Metrics worker stopped without a result",
            )),
        }
    }

    fn load_histories(
        &self,
        components: Vec<Component>,
        window: Window,
    ) -> Result<Vec<ComponentHistory>, AppError> {
        let ids: Vec<i64> = components.iter().map(|c| c.id).collect();
        let batch = self.store.events_in_range(&ids, window)?;
        let seeds = self.store.last_statuses_before(&ids, window.start)?;
        Ok(collect_histories(components, batch, seeds))
    }

    fn load_history(
        &self,
        component_id: i64,
        window: Window,
    ) -> Result<ComponentHistory, AppError> {
        let component = self.store.get_component(component_id)?;
        self.load_histories(vec![component], window)?
            .pop()
            .ok_or_else(|| AppError::component_not_found(component_id))
    }

    fn compute_component_uptime(
        &self,
        component_id: i64,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<ComponentUptime, AppError> {
        let now = minute_floor(now);
        let window = Window::new(now - Duration::days(days as i64), now)?;
        let history = self.load_history(component_id, window)?;
        Ok(history.uptime(window, &self.config))
    }

    fn compute_timeline(
        &self,
        component_id: i64,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<DailyTimeline, AppError> {
        let (first, last) = day_range(days, now);
        let history = self.load_history(component_id, Window::for_days(first, last))?;
        let timeline = history.timeline(first, last, &self.config);
        tracing::debug!(
            component_id,
            days = timeline.days.len(),
            events = history.events.len(),
            "built daily status timeline"
        );
        Ok(timeline)
    }

    fn compute_aggregate(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<Vec<AggregatedDailySummary>, AppError> {
        let (first, last) = day_range(days, now);
        let listing = self.store.list_enabled_components()?;
        let skipped = listing.skipped.len() as u32;
        let histories = self.load_histories(listing.components, Window::for_days(first, last))?;
        Ok(aggregate_daily(&histories, skipped, first, last, &self.config))
    }

    fn compute_system_uptime(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<SystemUptime, AppError> {
        let now = minute_floor(now);
        let window = Window::new(now - Duration::days(days as i64), now)?;
        let listing = self.store.list_enabled_components()?;
        let skipped = listing.skipped.len() as u32;
        let histories = self.load_histories(listing.components, window)?;
        Ok(system_uptime(&histories, skipped, window, &self.config))
    }

    pub fn get_component_uptime(
        &self,
        component_id: i64,
        days: u32,
    ) -> Result<ComponentUptime, AppError> {
        self.get_component_uptime_at(component_id, days, OffsetDateTime::now_utc())
    }

    /// Uptime over `[now - days, now]`, with `now` rounded down to the minute. `days == 0` is an
    /// empty window: 100% by policy.
    pub fn get_component_uptime_at(
        &self,
        component_id: i64,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<ComponentUptime, AppError> {
        validate_days(days)?;
        let key = self.key(CacheScope::Component(component_id), days, MetricKind::Uptime, now);
        self.read_through(key, || self.compute_component_uptime(component_id, days, now))
    }

    pub fn get_daily_status_timeline(
        &self,
        component_id: i64,
        days: u32,
    ) -> Result<DailyTimeline, AppError> {
        self.get_daily_status_timeline_at(component_id, days, OffsetDateTime::now_utc())
    }

    /// One summary per calendar day from `date(now - days)` through `date(now)`.
    pub fn get_daily_status_timeline_at(
        &self,
        component_id: i64,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<DailyTimeline, AppError> {
        validate_days(days)?;
        let key = self.key(CacheScope::Component(component_id), days, MetricKind::Timeline, now);
        self.read_through(key, || self.compute_timeline(component_id, days, now))
    }

    pub fn get_aggregated_status_data(
        &self,
        days: u32,
    ) -> Result<Vec<AggregatedDailySummary>, AppError> {
        self.get_aggregated_status_data_at(days, OffsetDateTime::now_utc())
    }

    pub fn get_aggregated_status_data_at(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<Vec<AggregatedDailySummary>, AppError> {
        validate_days(days)?;
        let key = self.key(CacheScope::All, days, MetricKind::Aggregate, now);
        self.read_through(key, || self.compute_aggregate(days, now))
    }

    pub fn get_system_uptime(&self, days: u32) -> Result<SystemUptime, AppError> {
        self.get_system_uptime_at(days, OffsetDateTime::now_utc())
    }

    pub fn get_system_uptime_at(
        &self,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<SystemUptime, AppError> {
        validate_days(days)?;
        let key = self.key(CacheScope::All, days, MetricKind::SystemUptime, now);
        self.read_through(key, || self.compute_system_uptime(days, now))
    }

    pub fn get_sla_report(&self, component_id: i64, days: u32) -> Result<SlaReport, AppError> {
        self.get_sla_report_at(component_id, days, OffsetDateTime::now_utc())
    }

    pub fn get_sla_report_at(
        &self,
        component_id: i64,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<SlaReport, AppError> {
        validate_days(days)?;
        let key = self.key(CacheScope::Component(component_id), days, MetricKind::Sla, now);
        self.read_through(key, || {
            let uptime = self.get_component_uptime_at(component_id, days, now)?;
            Ok(sla_report(&uptime, &self.config.sla))
        })
    }

    pub fn get_component_uptime_with_timeout(
        &self,
        component_id: i64,
        days: u32,
        timeout: StdDuration,
    ) -> Result<Served<ComponentUptime>, AppError> {
        validate_days(days)?;
        let now = OffsetDateTime::now_utc();
        let key = self.key(CacheScope::Component(component_id), days, MetricKind::Uptime, now);
        self.read_with_timeout(key, timeout, move |svc| {
            svc.compute_component_uptime(component_id, days, now)
        })
    }

    pub fn get_daily_status_timeline_with_timeout(
        &self,
        component_id: i64,
        days: u32,
        timeout: StdDuration,
    ) -> Result<Served<DailyTimeline>, AppError> {
        validate_days(days)?;
        let now = OffsetDateTime::now_utc();
        let key = self.key(CacheScope::Component(component_id), days, MetricKind::Timeline, now);
        self.read_with_timeout(key, timeout, move |svc| {
            svc.compute_timeline(component_id, days, now)
        })
    }

    pub fn get_aggregated_status_data_with_timeout(
        &self,
        days: u32,
        timeout: StdDuration,
    ) -> Result<Served<Vec<AggregatedDailySummary>>, AppError> {
        validate_days(days)?;
        let now = OffsetDateTime::now_utc();
        let key = self.key(CacheScope::All, days, MetricKind::Aggregate, now);
        self.read_with_timeout(key, timeout, move |svc| svc.compute_aggregate(days, now))
    }

    /// Append a status change, then invalidate before returning, so no reader sees a value
    /// computed before the event once the caller has been acknowledged.
    pub fn record_status_change(&self, change: &StatusChange) -> Result<StatusEvent, AppError> {
        let event = self.store.append_status_change(change)?;
        self.cache.invalidate(Invalidation::Component(event.component_id));
        tracing::info!(
            component_id = event.component_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            incident_id = ?event.incident_id,
            "recorded status change"
        );
        Ok(event)
    }

    pub fn clear_component_metrics_cache(&self, component_id: i64) {
        self.cache.invalidate(Invalidation::Component(component_id));
    }

    pub fn clear_incident_metrics_cache(&self) {
        self.cache.invalidate(Invalidation::Incidents);
    }

    pub fn clear_all_metrics_cache(&self) {
        self.cache.invalidate(Invalidation::All);
    }
}
