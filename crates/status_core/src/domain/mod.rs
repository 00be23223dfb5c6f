use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};

use crate::error::AppError;

/// Component status as published on the status page.
///
/// Declaration order is the canonical iteration order (map keys, predominant-status
/// tie-breaking). It is NOT the severity order; see `config::SeverityOrder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Operational,
    DegradedPerformance,
    PartialOutage,
    MajorOutage,
    UnderMaintenance,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Operational,
        Status::DegradedPerformance,
        Status::PartialOutage,
        Status::MajorOutage,
        Status::UnderMaintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Operational => "operational",
            Status::DegradedPerformance => "degraded_performance",
            Status::PartialOutage => "partial_outage",
            Status::MajorOutage => "major_outage",
            Status::UnderMaintenance => "under_maintenance",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Operational => "Operational",
            Status::DegradedPerformance => "Degraded performance",
            Status::PartialOutage => "Partial outage",
            Status::MajorOutage => "Major outage",
            Status::UnderMaintenance => "Under maintenance",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                AppError::new("STATUS_UNKNOWN", "Unrecognized status value")
                    .with_details(format!("value={s}"))
            })
    }
}

/// Whole minutes per status. Always carries all five keys.
pub type MinutesByStatus = BTreeMap<Status, u64>;

pub fn empty_minutes() -> MinutesByStatus {
    Status::ALL.into_iter().map(|s| (s, 0)).collect()
}

/// Component counts per status for one date. Always carries all five keys.
pub type CountsByStatus = BTreeMap<Status, u32>;

pub fn empty_counts() -> CountsByStatus {
    Status::ALL.into_iter().map(|s| (s, 0)).collect()
}

/// Registry record owned by component management; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    pub id: i64,
    pub name: String,
    pub current_status: Status,
    pub enabled: bool,
}

/// Immutable status transition. `old_status != new_status` is enforced on the write path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: i64,
    pub component_id: i64,
    pub old_status: Status,
    pub new_status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub incident_id: Option<i64>,
    pub actor: Option<String>,
}

/// Input to the write path. `old_status` is taken from the component's current status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub component_id: i64,
    pub new_status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub incident_id: Option<i64>,
    pub actor: Option<String>,
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl Window {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, AppError> {
        if end < start {
            return Err(
                AppError::new("VALIDATION_WINDOW_INVALID", "Window end precedes its start")
                    .with_details(format!("start={start}; end={end}")),
            );
        }
        Ok(Self { start, end })
    }

    /// Full UTC calendar day containing `date`.
    pub fn for_day(date: Date) -> Self {
        let start = date.midnight().assume_utc();
        Self {
            start,
            end: start + Duration::DAY,
        }
    }

    /// From the start of `first` through the end of `last`.
    pub fn for_days(first: Date, last: Date) -> Self {
        Self {
            start: Self::for_day(first).start,
            end: Self::for_day(last).end,
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl Interval {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStatusSummary {
    pub date: Date,
    pub minutes_by_status: MinutesByStatus,
    pub predominant_status: Status,
    pub worst_status: Status,
    pub uptime_percentage: f64,
    pub status_change_count: u32,
    pub incident_count: u32,
}

/// Cross-component view of one date.
///
/// `uptime_percentage` counts components whose predominant status was operational; it is not
/// an average of per-component minute-weighted uptime. Dashboards consume both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedDailySummary {
    pub date: Date,
    pub counts_by_status: CountsByStatus,
    pub total_components: u32,
    /// Enabled components left out because their records could not be decoded.
    pub skipped_components: u32,
    pub uptime_percentage: f64,
}

/// How the status at the start of a window was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    /// `new_status` of the last event before the window.
    PriorEvent,
    /// `old_status` of the first event inside the window.
    FirstEventOldStatus,
    /// Component's current status. Approximate: wrong if history before the window changed it.
    CurrentStatusFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl IntegrityWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Non-fatal data problems found while computing a result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataIntegrity {
    pub clamped_intervals: u32,
    pub skipped_records: u32,
    pub reordered_events: u32,
    pub chain_mismatches: u32,
    pub events_outside_window: u32,
    pub seed_source: Option<SeedSource>,
    pub warnings: Vec<IntegrityWarning>,
}

impl DataIntegrity {
    pub fn is_clean(&self) -> bool {
        self.clamped_intervals == 0
            && self.skipped_records == 0
            && self.reordered_events == 0
            && self.chain_mismatches == 0
            && self.events_outside_window == 0
    }

    pub fn merge(&mut self, other: DataIntegrity) {
        self.clamped_intervals += other.clamped_intervals;
        self.skipped_records += other.skipped_records;
        self.reordered_events += other.reordered_events;
        self.chain_mismatches += other.chain_mismatches;
        self.events_outside_window += other.events_outside_window;
        if self.seed_source.is_none() {
            self.seed_source = other.seed_source;
        }
        self.warnings.extend(other.warnings);
    }

    pub(crate) fn record_skipped(&mut self, warning: IntegrityWarning) {
        self.skipped_records += 1;
        self.warnings.push(warning);
    }
}
