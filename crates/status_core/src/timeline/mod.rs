use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::config::MetricsConfig;
use crate::domain::{
    DailyStatusSummary, DataIntegrity, IntegrityWarning, MinutesByStatus, Status, StatusEvent,
    Window,
};
use crate::intervals::{minutes_by_status, reconstruct, Reconstruction};
use crate::uptime::compute_uptime;

pub const MINUTES_PER_DAY: u64 = 1440;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyTimeline {
    pub component_id: i64,
    pub days: Vec<DailyStatusSummary>,
    pub integrity: DataIntegrity,
}

/// Build one summary per UTC calendar day in `first_day..=last_day`.
///
/// `events` must be sorted by `(occurred_at, id)`. `seed` is the status at the start of
/// `first_day`; each following day is seeded with the previous day's end status, so the events
/// are walked once. Events before `first_day` advance the seed; events after `last_day` are
/// ignored and counted.
///
/// Days are whole: the part of the current day that lies in the future is attributed to the
/// last known status.
pub fn build_daily_timeline(
    component_id: i64,
    events: &[StatusEvent],
    seed: Status,
    first_day: Date,
    last_day: Date,
    config: &MetricsConfig,
) -> DailyTimeline {
    let mut integrity = DataIntegrity::default();
    let mut days = Vec::new();
    let mut status = seed;
    let mut next = 0;

    let range_start = Window::for_day(first_day).start;
    while next < events.len() && events[next].occurred_at < range_start {
        status = events[next].new_status;
        next += 1;
    }

    let mut day = first_day;
    while day <= last_day {
        let window = Window::for_day(day);
        let begin = next;
        while next < events.len() && events[next].occurred_at < window.end {
            next += 1;
        }
        let day_events = &events[begin..next];

        let rec = reconstruct(day_events, window, status);
        days.push(summarize_day(day, status, day_events, &rec, config));
        status = rec.end_status;
        integrity.merge(rec.integrity);

        match day.next_day() {
            Some(d) => day = d,
            None => break,
        }
    }

    let trailing = events.len() - next;
    if trailing > 0 {
        integrity.events_outside_window += trailing as u32;
        integrity.warnings.push(
            IntegrityWarning::new(
                "INTEGRITY_EVENT_OUTSIDE_WINDOW",
                "Events after the last requested day were ignored",
            )
            .with_details(format!("count={trailing}; last_day={last_day}")),
        );
    }

    DailyTimeline {
        component_id,
        days,
        integrity,
    }
}

fn summarize_day(
    date: Date,
    seed: Status,
    day_events: &[StatusEvent],
    rec: &Reconstruction,
    config: &MetricsConfig,
) -> DailyStatusSummary {
    let minutes = minutes_by_status(&rec.intervals, MINUTES_PER_DAY);
    let worst_status = config
        .severity_order
        .worst(std::iter::once(seed).chain(day_events.iter().map(|e| e.new_status)))
        .unwrap_or(seed);
    let incidents: BTreeSet<i64> = day_events.iter().filter_map(|e| e.incident_id).collect();

    DailyStatusSummary {
        date,
        predominant_status: predominant_status(&minutes, rec.end_status),
        worst_status,
        uptime_percentage: compute_uptime(
            &minutes,
            MINUTES_PER_DAY,
            config.calculation_mode,
            &config.uptime_weights,
        ),
        status_change_count: day_events.len() as u32,
        incident_count: incidents.len() as u32,
        minutes_by_status: minutes,
    }
}

/// Status with the most minutes.
///
/// Tie rule: the status active at day end wins any tie it is part of; otherwise the earliest
/// status in declaration order wins.
pub fn predominant_status(minutes: &MinutesByStatus, end_status: Status) -> Status {
    let minutes_of = |s: Status| minutes.get(&s).copied().unwrap_or(0);
    let mut best = end_status;
    for status in Status::ALL {
        if minutes_of(status) > minutes_of(best) {
            best = status;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::empty_minutes;
    use time::macros::{date, datetime};
    use time::OffsetDateTime;

    fn event(
        id: i64,
        old: Status,
        new: Status,
        at: OffsetDateTime,
        incident_id: Option<i64>,
    ) -> StatusEvent {
        StatusEvent {
            id,
            component_id: 9,
            old_status: old,
            new_status: new,
            occurred_at: at,
            incident_id,
            actor: None,
        }
    }

    #[test]
    fn quiet_day_is_fully_operational() {
        let day = date!(2026 - 04 - 10);
        let t = build_daily_timeline(
            9,
            &[],
            Status::Operational,
            day,
            day,
            &MetricsConfig::default(),
        );
        assert_eq!(t.days.len(), 1);
        let d = &t.days[0];
        assert_eq!(d.minutes_by_status[&Status::Operational], 1440);
        assert_eq!(d.uptime_percentage, 100.0);
        assert_eq!(d.predominant_status, Status::Operational);
        assert_eq!(d.worst_status, Status::Operational);
        assert_eq!(d.status_change_count, 0);
    }

    #[test]
    fn end_of_day_status_seeds_next_day() {
        let events = vec![event(
            1,
            Status::Operational,
            Status::MajorOutage,
            datetime!(2026-04-10 18:00 UTC),
            Some(77),
        )];
        let t = build_daily_timeline(
            9,
            &events,
            Status::Operational,
            date!(2026 - 04 - 10),
            date!(2026 - 04 - 12),
            &MetricsConfig::default(),
        );
        assert_eq!(t.days.len(), 3);
        assert_eq!(t.days[0].minutes_by_status[&Status::MajorOutage], 360);
        assert_eq!(t.days[0].incident_count, 1);
        assert_eq!(t.days[1].minutes_by_status[&Status::MajorOutage], 1440);
        assert_eq!(t.days[1].worst_status, Status::MajorOutage);
        assert_eq!(t.days[2].predominant_status, Status::MajorOutage);
        assert_eq!(t.days[2].status_change_count, 0);
    }

    #[test]
    fn midnight_event_belongs_to_the_day_it_begins() {
        let events = vec![event(
            1,
            Status::Operational,
            Status::PartialOutage,
            datetime!(2026-04-11 00:00 UTC),
            None,
        )];
        let t = build_daily_timeline(
            9,
            &events,
            Status::Operational,
            date!(2026 - 04 - 10),
            date!(2026 - 04 - 11),
            &MetricsConfig::default(),
        );
        assert_eq!(t.days[0].status_change_count, 0);
        assert_eq!(t.days[0].minutes_by_status[&Status::Operational], 1440);
        assert_eq!(t.days[0].worst_status, Status::Operational);
        assert_eq!(t.days[1].status_change_count, 1);
        assert_eq!(t.days[1].minutes_by_status[&Status::PartialOutage], 1440);
    }

    #[test]
    fn events_before_range_advance_the_seed() {
        let events = vec![event(
            1,
            Status::Operational,
            Status::UnderMaintenance,
            datetime!(2026-04-09 22:00 UTC),
            None,
        )];
        let day = date!(2026 - 04 - 10);
        let t = build_daily_timeline(
            9,
            &events,
            Status::Operational,
            day,
            day,
            &MetricsConfig::default(),
        );
        assert_eq!(t.days[0].predominant_status, Status::UnderMaintenance);
        assert!(t.integrity.is_clean());
    }

    #[test]
    fn incident_count_is_distinct() {
        let events = vec![
            event(
                1,
                Status::Operational,
                Status::DegradedPerformance,
                datetime!(2026-04-10 01:00 UTC),
                Some(5),
            ),
            event(
                2,
                Status::DegradedPerformance,
                Status::MajorOutage,
                datetime!(2026-04-10 02:00 UTC),
                Some(5),
            ),
            event(
                3,
                Status::MajorOutage,
                Status::Operational,
                datetime!(2026-04-10 03:00 UTC),
                None,
            ),
        ];
        let day = date!(2026 - 04 - 10);
        let t = build_daily_timeline(
            9,
            &events,
            Status::Operational,
            day,
            day,
            &MetricsConfig::default(),
        );
        assert_eq!(t.days[0].status_change_count, 3);
        assert_eq!(t.days[0].incident_count, 1);
        assert_eq!(t.days[0].worst_status, Status::MajorOutage);
    }

    #[test]
    fn predominant_tie_prefers_end_of_day_status() {
        let mut m = empty_minutes();
        m.insert(Status::Operational, 720);
        m.insert(Status::MajorOutage, 720);
        assert_eq!(
            predominant_status(&m, Status::MajorOutage),
            Status::MajorOutage
        );
        assert_eq!(
            predominant_status(&m, Status::Operational),
            Status::Operational
        );
        // End status not in the tie: declaration order decides.
        assert_eq!(
            predominant_status(&m, Status::UnderMaintenance),
            Status::Operational
        );
    }
}
