use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::{CalculationMode, MetricsConfig, SlaConfig, WeightTable};
use crate::domain::{DataIntegrity, MinutesByStatus, Status, StatusEvent, Window};
use crate::intervals::{minutes_by_status, reconstruct};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentUptime {
    pub component_id: i64,
    pub uptime_percentage: f64,
    pub total_minutes: u64,
    pub minutes_by_status: MinutesByStatus,
    pub downtime_minutes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub calculation_mode: CalculationMode,
    pub integrity: DataIntegrity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaReport {
    pub component_id: i64,
    pub target_percentage: f64,
    pub uptime_percentage: f64,
    pub total_minutes: u64,
    pub allowed_downtime_minutes: f64,
    pub downtime_minutes: u64,
    /// Negative once the budget is exhausted.
    pub remaining_budget_minutes: f64,
    pub met: bool,
    pub include_maintenance_in_downtime: bool,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Uptime percentage in `[0, 100]`, rounded to two decimals.
///
/// An empty window (`total_minutes == 0`) is 100% by policy.
pub fn compute_uptime(
    minutes: &MinutesByStatus,
    total_minutes: u64,
    mode: CalculationMode,
    weights: &WeightTable,
) -> f64 {
    if total_minutes == 0 {
        return 100.0;
    }
    let minutes_of = |s: Status| minutes.get(&s).copied().unwrap_or(0) as f64;

    let healthy = match mode {
        CalculationMode::Weighted => Status::ALL
            .into_iter()
            .map(|s| minutes_of(s) * weights.weight(s).clamp(0.0, 1.0))
            .sum::<f64>(),
        CalculationMode::Binary => minutes_of(Status::Operational),
    };

    round2(healthy / total_minutes as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn downtime_minutes(minutes: &MinutesByStatus, include_maintenance: bool) -> u64 {
    Status::ALL
        .into_iter()
        .filter(|s| match s {
            Status::Operational => false,
            Status::DegradedPerformance | Status::PartialOutage | Status::MajorOutage => true,
            Status::UnderMaintenance => include_maintenance,
        })
        .map(|s| minutes.get(&s).copied().unwrap_or(0))
        .sum()
}

/// Minute-weighted uptime of one component over an arbitrary window.
///
/// `events` must be sorted and fall inside `window`; `seed` is the status at `window.start`.
pub fn component_uptime(
    component_id: i64,
    events: &[StatusEvent],
    seed: Status,
    window: Window,
    config: &MetricsConfig,
) -> ComponentUptime {
    let rec = reconstruct(events, window, seed);
    let total_minutes = window.length().whole_minutes().max(0) as u64;
    let minutes = minutes_by_status(&rec.intervals, total_minutes);

    ComponentUptime {
        component_id,
        uptime_percentage: compute_uptime(
            &minutes,
            total_minutes,
            config.calculation_mode,
            &config.uptime_weights,
        ),
        total_minutes,
        downtime_minutes: downtime_minutes(&minutes, config.sla.include_maintenance_in_downtime),
        minutes_by_status: minutes,
        period_start: window.start,
        period_end: window.end,
        calculation_mode: config.calculation_mode,
        integrity: rec.integrity,
    }
}

pub fn sla_report(uptime: &ComponentUptime, sla: &SlaConfig) -> SlaReport {
    let allowed =
        round2(uptime.total_minutes as f64 * (100.0 - sla.target_percentage) / 100.0);
    let downtime = uptime.downtime_minutes;

    SlaReport {
        component_id: uptime.component_id,
        target_percentage: sla.target_percentage,
        uptime_percentage: uptime.uptime_percentage,
        total_minutes: uptime.total_minutes,
        allowed_downtime_minutes: allowed,
        downtime_minutes: downtime,
        remaining_budget_minutes: round2(allowed - downtime as f64),
        met: downtime as f64 <= allowed,
        include_maintenance_in_downtime: sla.include_maintenance_in_downtime,
    }
}
