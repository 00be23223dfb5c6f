use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::config::MetricsConfig;
use crate::domain::{
    empty_counts, AggregatedDailySummary, Component, CountsByStatus, DataIntegrity, Status,
    StatusEvent, Window,
};
use crate::intervals::{resolve_seed, sort_events};
use crate::store::{EventBatch, SeedBatch};
use crate::timeline::{build_daily_timeline, DailyTimeline};
use crate::uptime::{component_uptime, round2, ComponentUptime};

/// Everything needed to reconstruct one component over one window, fetched up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentHistory {
    pub component: Component,
    /// Status at the window start.
    pub seed: Status,
    /// Sorted by `(occurred_at, id)`.
    pub events: Vec<StatusEvent>,
    /// Problems found while loading (skipped rows, reordering, seed provenance).
    pub integrity: DataIntegrity,
}

impl ComponentHistory {
    pub fn uptime(&self, window: Window, config: &MetricsConfig) -> ComponentUptime {
        let mut uptime =
            component_uptime(self.component.id, &self.events, self.seed, window, config);
        let mut integrity = self.integrity.clone();
        integrity.merge(std::mem::take(&mut uptime.integrity));
        uptime.integrity = integrity;
        uptime
    }

    pub fn timeline(
        &self,
        first_day: Date,
        last_day: Date,
        config: &MetricsConfig,
    ) -> DailyTimeline {
        let mut timeline = build_daily_timeline(
            self.component.id,
            &self.events,
            self.seed,
            first_day,
            last_day,
            config,
        );
        let mut integrity = self.integrity.clone();
        integrity.merge(std::mem::take(&mut timeline.integrity));
        timeline.integrity = integrity;
        timeline
    }
}

/// Split one bulk fetch into per-component histories, in `components` order.
///
/// `seeds` holds each component's last status before the window (see
/// `EventStore::last_statuses_before`); prior rows it skipped count against the component.
pub fn collect_histories(
    components: Vec<Component>,
    batch: EventBatch,
    seeds: SeedBatch,
) -> Vec<ComponentHistory> {
    let mut grouped: HashMap<i64, Vec<StatusEvent>> = HashMap::new();
    for event in batch.events {
        grouped.entry(event.component_id).or_default().push(event);
    }
    let mut skipped: HashMap<i64, DataIntegrity> = HashMap::new();
    for record in batch.skipped.into_iter().chain(seeds.skipped) {
        skipped
            .entry(record.component_id)
            .or_default()
            .record_skipped(record.warning);
    }

    components
        .into_iter()
        .map(|component| {
            let mut integrity = skipped.remove(&component.id).unwrap_or_default();
            let mut events = grouped.remove(&component.id).unwrap_or_default();
            sort_events(&mut events, &mut integrity);

            let (seed, source) = resolve_seed(
                seeds.statuses.get(&component.id).copied(),
                events.first(),
                component.current_status,
            );
            integrity.seed_source = Some(source);

            ComponentHistory {
                component,
                seed,
                events,
                integrity,
            }
        })
        .collect()
}

pub fn days_in(first_day: Date, last_day: Date) -> Vec<Date> {
    let mut out = Vec::new();
    let mut day = first_day;
    while day <= last_day {
        out.push(day);
        match day.next_day() {
            Some(d) => day = d,
            None => break,
        }
    }
    out
}

fn component_share(count: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    round2(count as f64 / total as f64 * 100.0)
}

/// Per-date counts of components by predominant status.
///
/// Timelines are built in parallel; merging goes through a date-keyed map so the output does
/// not depend on completion order. Every day in the range is present even with no components.
/// `skipped_components` is how many components could not be loaded at all; they are reported
/// but not counted in `total_components`.
pub fn aggregate_daily(
    histories: &[ComponentHistory],
    skipped_components: u32,
    first_day: Date,
    last_day: Date,
    config: &MetricsConfig,
) -> Vec<AggregatedDailySummary> {
    let timelines: Vec<DailyTimeline> = histories
        .par_iter()
        .map(|h| h.timeline(first_day, last_day, config))
        .collect();

    let mut by_date: BTreeMap<Date, CountsByStatus> = days_in(first_day, last_day)
        .into_iter()
        .map(|d| (d, empty_counts()))
        .collect();

    let mut anomalies = 0_u32;
    for timeline in &timelines {
        if !timeline.integrity.is_clean() {
            anomalies += 1;
        }
        for day in &timeline.days {
            if let Some(counts) = by_date.get_mut(&day.date) {
                *counts.entry(day.predominant_status).or_default() += 1;
            }
        }
    }
    if anomalies > 0 || skipped_components > 0 {
        tracing::warn!(
            components = anomalies,
            skipped_components,
            "data-integrity warnings while aggregating daily status"
        );
    }

    let total = histories.len() as u32;
    by_date
        .into_iter()
        .map(|(date, counts)| AggregatedDailySummary {
            date,
            uptime_percentage: component_share(
                counts.get(&Status::Operational).copied().unwrap_or(0),
                total,
            ),
            counts_by_status: counts,
            total_components: total,
            skipped_components,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentUptimeEntry {
    pub component_id: i64,
    pub name: String,
    pub uptime_percentage: f64,
}

/// Mean of enabled components' minute-weighted uptime over one window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemUptime {
    pub uptime_percentage: f64,
    pub component_count: u32,
    /// Enabled components left out because their records could not be decoded.
    pub skipped_components: u32,
    pub components: Vec<ComponentUptimeEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
}

pub fn system_uptime(
    histories: &[ComponentHistory],
    skipped_components: u32,
    window: Window,
    config: &MetricsConfig,
) -> SystemUptime {
    let components: Vec<ComponentUptimeEntry> = histories
        .par_iter()
        .map(|h| ComponentUptimeEntry {
            component_id: h.component.id,
            name: h.component.name.clone(),
            uptime_percentage: h.uptime(window, config).uptime_percentage,
        })
        .collect();

    let uptime_percentage = if components.is_empty() {
        100.0
    } else {
        round2(
            components.iter().map(|c| c.uptime_percentage).sum::<f64>() / components.len() as f64,
        )
    };

    SystemUptime {
        uptime_percentage,
        component_count: components.len() as u32,
        skipped_components,
        components,
        period_start: window.start,
        period_end: window.end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrityWarning, SeedSource};
    use crate::store::SkippedRecord;
    use time::macros::{date, datetime};

    fn component(id: i64, status: Status) -> Component {
        Component {
            id,
            name: format!("c{id}"),
            current_status: status,
            enabled: true,
        }
    }

    fn history(id: i64, seed: Status) -> ComponentHistory {
        ComponentHistory {
            component: component(id, seed),
            seed,
            events: Vec::new(),
            integrity: DataIntegrity::default(),
        }
    }

    #[test]
    fn counts_predominant_status_per_component() {
        let d = date!(2026 - 06 - 01);
        let histories = vec![
            history(1, Status::Operational),
            history(2, Status::Operational),
            history(3, Status::MajorOutage),
        ];
        let out = aggregate_daily(&histories, 0, d, d, &MetricsConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].counts_by_status[&Status::Operational], 2);
        assert_eq!(out[0].counts_by_status[&Status::MajorOutage], 1);
        assert_eq!(out[0].total_components, 3);
        assert_eq!(out[0].uptime_percentage, 66.67);
    }

    #[test]
    fn no_components_means_full_uptime_every_day() {
        let out = aggregate_daily(
            &[],
            0,
            date!(2026 - 06 - 01),
            date!(2026 - 06 - 07),
            &MetricsConfig::default(),
        );
        assert_eq!(out.len(), 7);
        assert!(out
            .iter()
            .all(|d| d.total_components == 0 && d.uptime_percentage == 100.0));
    }

    #[test]
    fn collect_groups_sorts_and_seeds() {
        let events = vec![
            StatusEvent {
                id: 11,
                component_id: 2,
                old_status: Status::PartialOutage,
                new_status: Status::Operational,
                occurred_at: datetime!(2026-06-01 05:00 UTC),
                incident_id: None,
                actor: None,
            },
            StatusEvent {
                id: 10,
                component_id: 1,
                old_status: Status::Operational,
                new_status: Status::DegradedPerformance,
                occurred_at: datetime!(2026-06-01 04:00 UTC),
                incident_id: None,
                actor: None,
            },
        ];
        let batch = EventBatch {
            events,
            skipped: vec![SkippedRecord {
                component_id: 3,
                warning: IntegrityWarning::new("INTEGRITY_RECORD_SKIPPED", "bad row"),
            }],
        };
        let seeds = SeedBatch {
            statuses: HashMap::from([(1, Status::Operational)]),
            skipped: vec![SkippedRecord {
                component_id: 2,
                warning: IntegrityWarning::new("INTEGRITY_RECORD_SKIPPED", "bad seed row"),
            }],
        };
        let histories = collect_histories(
            vec![
                component(1, Status::DegradedPerformance),
                component(2, Status::Operational),
                component(3, Status::UnderMaintenance),
            ],
            batch,
            seeds,
        );

        assert_eq!(histories[0].seed, Status::Operational);
        assert_eq!(histories[0].integrity.seed_source, Some(SeedSource::PriorEvent));
        assert_eq!(histories[1].seed, Status::PartialOutage);
        assert_eq!(
            histories[1].integrity.seed_source,
            Some(SeedSource::FirstEventOldStatus)
        );
        assert_eq!(histories[1].integrity.skipped_records, 1);
        assert_eq!(histories[2].seed, Status::UnderMaintenance);
        assert_eq!(histories[2].integrity.skipped_records, 1);
    }

    #[test]
    fn system_uptime_averages_components() {
        let window = Window::for_day(date!(2026 - 06 - 01));
        let mut config = MetricsConfig::default();
        config.calculation_mode = crate::config::CalculationMode::Binary;
        let out = system_uptime(
            &[history(1, Status::Operational), history(2, Status::MajorOutage)],
            1,
            window,
            &config,
        );
        assert_eq!(out.component_count, 2);
        assert_eq!(out.skipped_components, 1);
        assert_eq!(out.uptime_percentage, 50.0);

        let empty = system_uptime(&[], 0, window, &config);
        assert_eq!(empty.uptime_percentage, 100.0);
    }
}
