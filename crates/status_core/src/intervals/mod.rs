use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::domain::{
    empty_minutes, DataIntegrity, IntegrityWarning, Interval, MinutesByStatus, SeedSource,
    Status, StatusEvent, Window,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub intervals: Vec<Interval>,
    /// Status in force at `window.end`.
    pub end_status: Status,
    pub integrity: DataIntegrity,
}

/// Turn a timestamp-sorted event slice into a gapless interval cover of `window`.
///
/// Contract:
/// - intervals are contiguous, non-overlapping and their durations sum to `window.length()`;
/// - an event earlier than the running cursor yields a zero-length interval (clamped) and a
///   warning, never an error;
/// - events outside the window are ignored and counted;
/// - zero-length intervals are dropped from the output but still change the current status.
pub fn reconstruct(events: &[StatusEvent], window: Window, seed: Status) -> Reconstruction {
    let mut integrity = DataIntegrity::default();
    let mut intervals = Vec::new();
    let mut current = seed;
    let mut cursor = window.start;

    for event in events {
        if !window.contains(event.occurred_at) {
            integrity.events_outside_window += 1;
            integrity.warnings.push(
                IntegrityWarning::new(
                    "INTEGRITY_EVENT_OUTSIDE_WINDOW",
                    "Event outside the reconstruction window was ignored",
                )
                .with_details(format!(
                    "event_id={}; occurred_at={}; window=[{}, {})",
                    event.id, event.occurred_at, window.start, window.end
                )),
            );
            continue;
        }

        if event.old_status != current {
            integrity.chain_mismatches += 1;
            integrity.warnings.push(
                IntegrityWarning::new(
                    "INTEGRITY_STATUS_CHAIN_MISMATCH",
                    "Event old_status does not match the reconstructed status",
                )
                .with_details(format!(
                    "event_id={}; expected={}; old_status={}",
                    event.id, current, event.old_status
                )),
            );
        }

        if event.occurred_at < cursor {
            integrity.clamped_intervals += 1;
            integrity.warnings.push(
                IntegrityWarning::new(
                    "INTEGRITY_NEGATIVE_DURATION_CLAMPED",
                    "Event precedes the previous transition; duration clamped to zero",
                )
                .with_details(format!(
                    "event_id={}; occurred_at={}; cursor={}",
                    event.id, event.occurred_at, cursor
                )),
            );
        } else {
            push_interval(&mut intervals, current, cursor, event.occurred_at);
            cursor = event.occurred_at;
        }
        current = event.new_status;
    }

    push_interval(&mut intervals, current, cursor, window.end);

    Reconstruction {
        intervals,
        end_status: current,
        integrity,
    }
}

fn push_interval(
    out: &mut Vec<Interval>,
    status: Status,
    start: OffsetDateTime,
    end: OffsetDateTime,
) {
    if end > start {
        out.push(Interval { status, start, end });
    }
}

/// Sort events by `(occurred_at, id)`, recording each out-of-order arrival.
pub fn sort_events(events: &mut [StatusEvent], integrity: &mut DataIntegrity) {
    let key = |e: &StatusEvent| (e.occurred_at, e.id);
    let out_of_order = events
        .windows(2)
        .filter(|pair| key(&pair[1]) < key(&pair[0]))
        .count();
    if out_of_order == 0 {
        return;
    }

    events.sort_by_key(key);
    integrity.reordered_events += out_of_order as u32;
    integrity.warnings.push(
        IntegrityWarning::new(
            "INTEGRITY_EVENT_REORDERED",
            "Events arrived out of timestamp order and were re-sorted",
        )
        .with_details(format!("out_of_order={out_of_order}")),
    );
    tracing::warn!(out_of_order, "status events arrived out of order");
}

/// Status at the start of a window.
///
/// Prefers the last event before the window, then the first in-window event's `old_status`.
/// The component's current status is the last resort and is flagged as approximate.
pub fn resolve_seed(
    prior: Option<Status>,
    first_in_window: Option<&StatusEvent>,
    current: Status,
) -> (Status, SeedSource) {
    if let Some(status) = prior {
        return (status, SeedSource::PriorEvent);
    }
    if let Some(event) = first_in_window {
        return (event.old_status, SeedSource::FirstEventOldStatus);
    }
    (current, SeedSource::CurrentStatusFallback)
}

/// Apportion interval durations into whole minutes that sum to exactly `total_minutes`.
///
/// Largest-remainder method over millisecond durations; remainder ties go to the earlier
/// status in declaration order.
pub fn minutes_by_status(intervals: &[Interval], total_minutes: u64) -> MinutesByStatus {
    let mut millis: BTreeMap<Status, i128> = BTreeMap::new();
    for interval in intervals {
        *millis.entry(interval.status).or_default() +=
            interval.duration().whole_milliseconds().max(0);
    }
    let total: i128 = millis.values().sum();

    let mut minutes = empty_minutes();
    if total == 0 || total_minutes == 0 {
        return minutes;
    }

    let target = total_minutes as i128;
    let mut assigned = 0_i128;
    let mut remainders = Vec::with_capacity(millis.len());
    for (status, ms) in &millis {
        let scaled = ms * target;
        let whole = scaled / total;
        assigned += whole;
        minutes.insert(*status, whole as u64);
        remainders.push((scaled % total, *status));
    }

    // Stable sort keeps declaration order among equal remainders.
    remainders.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, status) in remainders.into_iter().take((target - assigned) as usize) {
        if let Some(m) = minutes.get_mut(&status) {
            *m += 1;
        }
    }
    minutes
}
