use rusqlite::Connection;
use time::format_description::well_known::Rfc3339;
use time::{Date, Duration};

use crate::domain::Status;
use crate::error::AppError;
use crate::ingest::status_csv::{import_status_csv, StatusCsvMapping, StatusImportSummary};

/// Days of history covered by the demo dataset, ending on the anchor date.
pub const DEMO_DAYS: i64 = 30;

const COMPONENTS: [&str; 4] = ["API", "Dashboard", "Webhooks", "Notifications"];

/// One demo episode: leave operational at `start_hour`, pass through `statuses`, one hour
/// each, then recover.
struct Episode {
    component: usize,
    day_offset: i64,
    start_hour: u8,
    statuses: &'static [Status],
    incident: Option<i64>,
}

const EPISODES: [Episode; 8] = [
    Episode {
        component: 0,
        day_offset: 27,
        start_hour: 8,
        statuses: &[Status::DegradedPerformance, Status::MajorOutage],
        incident: Some(1001),
    },
    Episode {
        component: 1,
        day_offset: 24,
        start_hour: 22,
        statuses: &[Status::UnderMaintenance, Status::UnderMaintenance],
        incident: None,
    },
    Episode {
        component: 2,
        day_offset: 19,
        start_hour: 23,
        statuses: &[Status::PartialOutage],
        incident: Some(1002),
    },
    Episode {
        component: 0,
        day_offset: 14,
        start_hour: 13,
        statuses: &[Status::PartialOutage],
        incident: Some(1003),
    },
    Episode {
        component: 3,
        day_offset: 11,
        start_hour: 2,
        statuses: &[Status::MajorOutage, Status::DegradedPerformance],
        incident: Some(1004),
    },
    Episode {
        component: 2,
        day_offset: 6,
        start_hour: 10,
        statuses: &[Status::DegradedPerformance],
        incident: Some(1005),
    },
    Episode {
        component: 1,
        day_offset: 3,
        start_hour: 0,
        statuses: &[Status::MajorOutage, Status::PartialOutage],
        incident: Some(1006),
    },
    Episode {
        component: 3,
        day_offset: 1,
        start_hour: 17,
        statuses: &[Status::DegradedPerformance],
        incident: Some(1007),
    },
];

fn demo_csv(anchor: Date) -> Result<String, AppError> {
    let mut out = String::new();
    out.push_str("Component,From,To,OccurredAt,Incident,Actor\n");

    for ep in &EPISODES {
        let day = anchor - Duration::days(ep.day_offset);
        let base = day.midnight().assume_utc() + Duration::hours(ep.start_hour as i64);
        let incident = ep.incident.map(|i| i.to_string()).unwrap_or_default();
        let name = COMPONENTS[ep.component];

        let mut previous = Status::Operational;
        let mut at = base;
        // Consecutive equal statuses collapse into one longer stretch.
        for next in ep.statuses.iter().copied().chain([Status::Operational]) {
            if next != previous {
                let ts = at.format(&Rfc3339).map_err(|e| {
                    AppError::new("DEMO_FORMAT_FAILED", "Failed to format demo timestamp")
                        .with_details(e.to_string())
                })?;
                out.push_str(&format!(
                    "{name},{previous},{next},{ts},{incident},demo-seed\n"
                ));
                previous = next;
            }
            at += Duration::hours(1);
        }
    }
    Ok(out)
}

/// Load a deterministic status history for four components covering the `DEMO_DAYS` days
/// up to `anchor`. Seeding twice inserts nothing new.
pub fn seed_demo_dataset(
    conn: &mut Connection,
    anchor: Date,
) -> Result<StatusImportSummary, AppError> {
    import_status_csv(conn, &demo_csv(anchor)?, &StatusCsvMapping::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn demo_csv_chains_back_to_operational() {
        let csv = demo_csv(date!(2026 - 03 - 31)).expect("csv");
        let lines: Vec<&str> = csv.lines().skip(1).collect();
        // Repeated maintenance collapses to one row; every episode ends with a recovery.
        assert_eq!(lines.len(), 19);
        assert!(lines
            .iter()
            .any(|l| l.starts_with("Dashboard,operational,under_maintenance,2026-03-07T22:00:00Z")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("Dashboard,under_maintenance,operational,2026-03-08T00:00:00Z")));
    }
}
