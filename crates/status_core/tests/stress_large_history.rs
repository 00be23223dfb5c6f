//! Stress test for a large status history.
//!
//! 200 components with a transition every ~9 hours over a year, then a 90-day aggregate and
//! per-component timelines. Run with `cargo test -- --ignored`.
use std::time::Instant;

use time::macros::datetime;
use time::Duration;

use status_core::config::MetricsConfig;
use status_core::db;
use status_core::domain::Status;
use status_core::service::MetricsService;
use status_core::store::{insert_event, upsert_component, ComponentUpsert, NewEvent, SqliteEventStore};

const COMPONENTS: usize = 200;
const EVENTS_PER_COMPONENT: i64 = 1_000;

#[test]
#[ignore]
fn aggregate_over_large_history_keeps_day_invariants() {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    let start = datetime!(2025-06-01 00:00 UTC);

    let tx = conn.transaction().expect("tx");
    let mut ids = Vec::with_capacity(COMPONENTS);
    for c in 0..COMPONENTS {
        let id = upsert_component(
            &tx,
            &ComponentUpsert {
                id: None,
                name: format!("component-{c:03}"),
                current_status: Status::Operational,
                enabled: true,
            },
        )
        .expect("component")
        .id;
        ids.push(id);

        let mut status = Status::Operational;
        for i in 0..EVENTS_PER_COMPONENT {
            let next = if status == Status::Operational {
                Status::ALL[1 + (i as usize + c) % 4]
            } else {
                Status::Operational
            };
            insert_event(
                &tx,
                &NewEvent {
                    component_id: id,
                    old_status: status,
                    new_status: next,
                    occurred_at: start + Duration::minutes(i * 523 + c as i64),
                    incident_id: Some(i % 50),
                    actor: None,
                },
            )
            .expect("event");
            status = next;
        }
    }
    tx.commit().expect("commit");

    let service = MetricsService::new(SqliteEventStore::new(conn), MetricsConfig::default())
        .expect("service");
    let now = datetime!(2026-05-01 12:00 UTC);

    let t0 = Instant::now();
    let days = service.get_aggregated_status_data_at(90, now).expect("aggregate");
    let elapsed = t0.elapsed();
    println!("aggregate over {COMPONENTS} components x 91 days: {elapsed:?}");

    assert_eq!(days.len(), 91);
    for day in &days {
        assert_eq!(day.total_components, COMPONENTS as u32);
        assert_eq!(day.counts_by_status.values().sum::<u32>(), COMPONENTS as u32);
        assert!((0.0..=100.0).contains(&day.uptime_percentage));
    }

    for id in ids.iter().take(20) {
        let timeline = service
            .get_daily_status_timeline_at(*id, 90, now)
            .expect("timeline");
        for day in &timeline.days {
            assert_eq!(day.minutes_by_status.values().sum::<u64>(), 1440);
        }
        assert_eq!(timeline.integrity.chain_mismatches, 0);
    }
}
