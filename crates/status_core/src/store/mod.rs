use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::{Component, IntegrityWarning, Status, StatusChange, StatusEvent, Window};
use crate::error::{db_error, AppError};

/// Event records for a component set, plus the records that could not be decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    /// Ordered by `(component_id, occurred_at, id)`.
    pub events: Vec<StatusEvent>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub component_id: i64,
    pub warning: IntegrityWarning,
}

/// Each component's status just before a window start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedBatch {
    /// `new_status` of the latest decodable event before the cut-off. Components without one
    /// are absent.
    pub statuses: HashMap<i64, Status>,
    /// Later prior events passed over because they could not be decoded.
    pub skipped: Vec<SkippedRecord>,
}

/// A component left out of a listing because its row could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedComponent {
    pub component_id: i64,
    pub name: String,
    pub enabled: bool,
    pub warning: IntegrityWarning,
}

/// Component registry contents, ordered by name then id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentListing {
    pub components: Vec<Component>,
    pub skipped: Vec<SkippedComponent>,
}

impl ComponentListing {
    pub fn enabled(self) -> Self {
        Self {
            components: self.components.into_iter().filter(|c| c.enabled).collect(),
            skipped: self.skipped.into_iter().filter(|c| c.enabled).collect(),
        }
    }
}

/// Read side of the status-event log plus the component registry it hangs off.
///
/// Implementations must return events ordered by timestamp and must not fail a whole query
/// because of one undecodable record; such records go to `EventBatch::skipped`.
pub trait EventStore: Send + Sync {
    fn get_component(&self, component_id: i64) -> Result<Component, AppError>;

    fn list_components(&self) -> Result<ComponentListing, AppError>;

    fn list_enabled_components(&self) -> Result<ComponentListing, AppError> {
        Ok(self.list_components()?.enabled())
    }

    /// Events with `range.start <= occurred_at < range.end` for all listed components.
    fn events_in_range(&self, component_ids: &[i64], range: Window)
        -> Result<EventBatch, AppError>;

    /// `new_status` of each component's last decodable event strictly before `at`.
    fn last_statuses_before(
        &self,
        component_ids: &[i64],
        at: OffsetDateTime,
    ) -> Result<SeedBatch, AppError>;

    /// Append a transition from the component's current status and make it the current status.
    fn append_status_change(&self, change: &StatusChange) -> Result<StatusEvent, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentUpsert {
    pub id: Option<i64>,
    pub name: String,
    pub current_status: Status,
    pub enabled: bool,
}

/// A decoded event that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub component_id: i64,
    pub old_status: Status,
    pub new_status: Status,
    pub occurred_at: OffsetDateTime,
    pub incident_id: Option<i64>,
    pub actor: Option<String>,
}

pub(crate) fn to_unix_ms(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_ms(ms: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).map_err(|e| {
        AppError::new("DB_DECODE_FAILED", "Event timestamp out of range")
            .with_details(format!("occurred_ms={ms}; err={e}"))
    })
}

/// Stable identity of a transition; duplicates are rejected on insert.
pub fn event_fingerprint(event: &NewEvent) -> String {
    let payload = format!(
        "component={}|old={}|new={}|at_ms={}|incident={}",
        event.component_id,
        event.old_status,
        event.new_status,
        to_unix_ms(event.occurred_at),
        event.incident_id.map(|i| i.to_string()).unwrap_or_default()
    );
    hex::encode(Sha256::digest(payload.as_bytes()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn decode_component(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn component_from_raw(raw: (i64, String, String, bool)) -> Result<Component, AppError> {
    let (id, name, status, enabled) = raw;
    let current_status = status.parse::<Status>().map_err(|e| {
        AppError::new("COMPONENT_STATUS_INVALID", "Component has an unrecognized status")
            .with_details(format!("component_id={id}; {}", e.details.unwrap_or_default()))
    })?;
    Ok(Component {
        id,
        name,
        current_status,
        enabled,
    })
}

pub fn get_component(conn: &Connection, component_id: i64) -> Result<Component, AppError> {
    let raw = conn
        .query_row(
            "SELECT id, name, current_status, enabled FROM components WHERE id = ?1",
            [component_id],
            decode_component,
        )
        .optional()
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query component"))?
        .ok_or_else(|| AppError::component_not_found(component_id))?;
    component_from_raw(raw)
}

pub fn find_component_by_name(conn: &Connection, name: &str) -> Result<Option<Component>, AppError> {
    let raw = conn
        .query_row(
            "SELECT id, name, current_status, enabled FROM components WHERE name = ?1",
            [name],
            decode_component,
        )
        .optional()
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query component by name"))?;
    raw.map(component_from_raw).transpose()
}

/// All components ordered by name. Components with an undecodable status are reported in
/// `ComponentListing::skipped`.
pub fn list_components(conn: &Connection) -> Result<ComponentListing, AppError> {
    let mut stmt = conn
        .prepare("SELECT id, name, current_status, enabled FROM components ORDER BY name ASC, id ASC")
        .map_err(db_error("DB_QUERY_FAILED", "Failed to prepare components query"))?;
    let rows = stmt
        .query_map([], decode_component)
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query components"))?;

    let mut out = ComponentListing::default();
    for r in rows {
        let raw = r.map_err(db_error("DB_QUERY_FAILED", "Failed to decode component row"))?;
        let (component_id, name, enabled) = (raw.0, raw.1.clone(), raw.3);
        match component_from_raw(raw) {
            Ok(c) => out.components.push(c),
            Err(e) => {
                tracing::warn!(component_id, error = %e, "skipping component with invalid status");
                out.skipped.push(SkippedComponent {
                    component_id,
                    name,
                    enabled,
                    warning: IntegrityWarning::new(
                        "INTEGRITY_COMPONENT_SKIPPED",
                        "Component with an undecodable status was skipped",
                    )
                    .with_details(e.details.unwrap_or(e.message)),
                });
            }
        }
    }
    Ok(out)
}

pub fn upsert_component(conn: &Connection, upsert: &ComponentUpsert) -> Result<Component, AppError> {
    if upsert.name.trim().is_empty() {
        return Err(AppError::new(
            "VALIDATION_COMPONENT_INVALID",
            "Component name is required",
        ));
    }

    if let Some(id) = upsert.id {
        let changed = conn
            .execute(
                "UPDATE components SET name = ?1, current_status = ?2, enabled = ?3 WHERE id = ?4",
                rusqlite::params![
                    upsert.name.trim(),
                    upsert.current_status.as_str(),
                    upsert.enabled,
                    id
                ],
            )
            .map_err(db_error("DB_WRITE_FAILED", "Failed to update component"))?;
        if changed == 0 {
            return Err(AppError::component_not_found(id));
        }
        return get_component(conn, id);
    }

    conn.execute(
        "INSERT INTO components(name, current_status, enabled, created_at) VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
        rusqlite::params![upsert.name.trim(), upsert.current_status.as_str(), upsert.enabled],
    )
    .map_err(db_error("DB_WRITE_FAILED", "Failed to create component"))?;
    get_component(conn, conn.last_insert_rowid())
}

/// Insert an event unless an identical one exists. Returns the new row id, or `None` for a
/// duplicate.
pub fn insert_event(conn: &Connection, event: &NewEvent) -> Result<Option<i64>, AppError> {
    if event.old_status == event.new_status {
        return Err(AppError::new(
            "EVENT_NO_TRANSITION",
            "Status events require old_status != new_status",
        )
        .with_details(format!(
            "component_id={}; status={}",
            event.component_id, event.new_status
        )));
    }
    let occurred_at = event.occurred_at.format(&Rfc3339).map_err(|e| {
        AppError::new("EVENT_ENCODE_FAILED", "Failed to format event timestamp")
            .with_details(e.to_string())
    })?;

    let changed = conn
        .execute(
            r#"
      INSERT OR IGNORE INTO status_events(
        component_id, old_status, new_status, occurred_at, occurred_ms,
        incident_id, actor, fingerprint, created_at
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
      "#,
            rusqlite::params![
                event.component_id,
                event.old_status.as_str(),
                event.new_status.as_str(),
                occurred_at,
                to_unix_ms(event.occurred_at),
                event.incident_id,
                event.actor,
                event_fingerprint(event),
            ],
        )
        .map_err(db_error("DB_WRITE_FAILED", "Failed to insert status event"))?;

    Ok((changed > 0).then(|| conn.last_insert_rowid()))
}

/// Set `current_status` to the `new_status` of the component's latest decodable event.
pub fn refresh_current_status(conn: &Connection, component_id: i64) -> Result<(), AppError> {
    let latest: Option<String> = conn
        .query_row(
            "SELECT new_status FROM status_events WHERE component_id = ?1 ORDER BY occurred_ms DESC, id DESC LIMIT 1",
            [component_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error("DB_QUERY_FAILED", "Failed to read latest status event"))?;

    let Some(raw) = latest else { return Ok(()) };
    let status = match raw.parse::<Status>() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(component_id, error = %e, "latest event has an invalid status");
            return Ok(());
        }
    };
    conn.execute(
        "UPDATE components SET current_status = ?1 WHERE id = ?2",
        rusqlite::params![status.as_str(), component_id],
    )
    .map_err(db_error("DB_WRITE_FAILED", "Failed to update component status"))?;
    Ok(())
}

fn skipped(component_id: i64, event_id: i64, reason: String) -> SkippedRecord {
    SkippedRecord {
        component_id,
        warning: IntegrityWarning::new(
            "INTEGRITY_RECORD_SKIPPED",
            "Undecodable status event was skipped",
        )
        .with_details(format!("event_id={event_id}; {reason}")),
    }
}

pub fn events_in_range(
    conn: &Connection,
    component_ids: &[i64],
    range: Window,
) -> Result<EventBatch, AppError> {
    if component_ids.is_empty() {
        return Ok(EventBatch::default());
    }

    let sql = format!(
        r#"
      SELECT id, component_id, old_status, new_status, occurred_ms, incident_id, actor
      FROM status_events
      WHERE occurred_ms >= ? AND occurred_ms < ? AND component_id IN ({})
      ORDER BY component_id ASC, occurred_ms ASC, id ASC
      "#,
        placeholders(component_ids.len())
    );
    let mut params = vec![to_unix_ms(range.start), to_unix_ms(range.end)];
    params.extend_from_slice(component_ids);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_error("DB_QUERY_FAILED", "Failed to prepare status events query"))?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query status events"))?;

    let mut batch = EventBatch::default();
    for r in rows {
        let (id, component_id, old_raw, new_raw, ms, incident_id, actor) =
            r.map_err(db_error("DB_QUERY_FAILED", "Failed to decode status event row"))?;

        let decoded = old_raw
            .parse::<Status>()
            .and_then(|old| new_raw.parse::<Status>().map(|new| (old, new)))
            .and_then(|(old, new)| from_unix_ms(ms).map(|at| (old, new, at)));
        match decoded {
            Ok((old_status, new_status, occurred_at)) => batch.events.push(StatusEvent {
                id,
                component_id,
                old_status,
                new_status,
                occurred_at,
                incident_id,
                actor,
            }),
            Err(e) => {
                tracing::warn!(event_id = id, component_id, error = %e, "skipping status event");
                batch.skipped.push(skipped(
                    component_id,
                    id,
                    e.details.unwrap_or(e.message),
                ));
            }
        }
    }
    Ok(batch)
}

/// Walk one component's prior events newest first until one decodes. Only used when every row
/// at the latest timestamp was undecodable.
fn earlier_decodable_status(
    conn: &Connection,
    component_id: i64,
    before_ms: i64,
    skipped_out: &mut Vec<SkippedRecord>,
) -> Result<Option<Status>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, new_status FROM status_events WHERE component_id = ?1 AND occurred_ms < ?2 ORDER BY occurred_ms DESC, id DESC",
        )
        .map_err(db_error("DB_QUERY_FAILED", "Failed to prepare prior events query"))?;
    let mut rows = stmt
        .query(rusqlite::params![component_id, before_ms])
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query prior events"))?;

    while let Some(row) = rows
        .next()
        .map_err(db_error("DB_QUERY_FAILED", "Failed to read prior event row"))?
    {
        let event_id: i64 = row
            .get(0)
            .map_err(db_error("DB_QUERY_FAILED", "Failed to decode prior event row"))?;
        let raw: String = row
            .get(1)
            .map_err(db_error("DB_QUERY_FAILED", "Failed to decode prior event row"))?;
        match raw.parse::<Status>() {
            Ok(status) => return Ok(Some(status)),
            Err(e) => skipped_out.push(skipped(
                component_id,
                event_id,
                e.details.unwrap_or(e.message),
            )),
        }
    }
    Ok(None)
}

pub fn last_statuses_before(
    conn: &Connection,
    component_ids: &[i64],
    at: OffsetDateTime,
) -> Result<SeedBatch, AppError> {
    if component_ids.is_empty() {
        return Ok(SeedBatch::default());
    }

    // One indexed lookup for the whole component set; ties on the same millisecond resolve to
    // the highest decodable id because rows are folded in id order.
    let sql = format!(
        r#"
      SELECT e.component_id, e.id, e.new_status, e.occurred_ms
      FROM status_events e
      JOIN (
        SELECT component_id, MAX(occurred_ms) AS last_ms
        FROM status_events
        WHERE occurred_ms < ? AND component_id IN ({})
        GROUP BY component_id
      ) last ON last.component_id = e.component_id AND last.last_ms = e.occurred_ms
      ORDER BY e.component_id ASC, e.id ASC
      "#,
        placeholders(component_ids.len())
    );
    let mut params = vec![to_unix_ms(at)];
    params.extend_from_slice(component_ids);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_error("DB_QUERY_FAILED", "Failed to prepare seed status query"))?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(db_error("DB_QUERY_FAILED", "Failed to query seed statuses"))?;

    let mut out = SeedBatch::default();
    // Components whose latest rows were all undecodable, with that timestamp.
    let mut undecided: HashMap<i64, i64> = HashMap::new();
    for r in rows {
        let (component_id, event_id, raw, ms) =
            r.map_err(db_error("DB_QUERY_FAILED", "Failed to decode seed status row"))?;
        match raw.parse::<Status>() {
            Ok(status) => {
                out.statuses.insert(component_id, status);
                undecided.remove(&component_id);
            }
            Err(e) => {
                tracing::warn!(event_id, component_id, error = %e, "skipping undecodable seed event");
                out.skipped.push(skipped(
                    component_id,
                    event_id,
                    e.details.unwrap_or(e.message),
                ));
                if !out.statuses.contains_key(&component_id) {
                    undecided.insert(component_id, ms);
                }
            }
        }
    }

    let mut undecided: Vec<(i64, i64)> = undecided.into_iter().collect();
    undecided.sort_unstable();
    for (component_id, last_ms) in undecided {
        if let Some(status) =
            earlier_decodable_status(conn, component_id, last_ms, &mut out.skipped)?
        {
            out.statuses.insert(component_id, status);
        }
    }
    Ok(out)
}

/// `EventStore` over a single SQLite connection.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run `f` with exclusive access to the connection (imports, seeding, admin writes).
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut guard = self.conn.lock().map_err(|_| {
            AppError::new("DB_LOCK_POISONED", "Event store connection lock is poisoned")
        })?;
        f(&mut guard)
    }
}

impl EventStore for SqliteEventStore {
    fn get_component(&self, component_id: i64) -> Result<Component, AppError> {
        self.with_connection(|conn| get_component(conn, component_id))
    }

    fn list_components(&self) -> Result<ComponentListing, AppError> {
        self.with_connection(|conn| list_components(conn))
    }

    fn events_in_range(
        &self,
        component_ids: &[i64],
        range: Window,
    ) -> Result<EventBatch, AppError> {
        self.with_connection(|conn| events_in_range(conn, component_ids, range))
    }

    fn last_statuses_before(
        &self,
        component_ids: &[i64],
        at: OffsetDateTime,
    ) -> Result<SeedBatch, AppError> {
        self.with_connection(|conn| last_statuses_before(conn, component_ids, at))
    }

    fn append_status_change(&self, change: &StatusChange) -> Result<StatusEvent, AppError> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(db_error("DB_TX_FAILED", "Failed to start status change transaction"))?;

            let component = get_component(&tx, change.component_id)?;
            let event = NewEvent {
                component_id: component.id,
                old_status: component.current_status,
                new_status: change.new_status,
                occurred_at: change.occurred_at,
                incident_id: change.incident_id,
                actor: change.actor.clone(),
            };
            let id = insert_event(&tx, &event)?.ok_or_else(|| {
                AppError::new("EVENT_DUPLICATE", "Identical status event already recorded")
                    .with_details(event_fingerprint(&event))
            })?;
            tx.execute(
                "UPDATE components SET current_status = ?1 WHERE id = ?2",
                rusqlite::params![change.new_status.as_str(), component.id],
            )
            .map_err(db_error("DB_WRITE_FAILED", "Failed to update component status"))?;
            tx.commit()
                .map_err(db_error("DB_TX_FAILED", "Failed to commit status change"))?;

            Ok(StatusEvent {
                id,
                component_id: event.component_id,
                old_status: event.old_status,
                new_status: event.new_status,
                occurred_at: event.occurred_at,
                incident_id: event.incident_id,
                actor: event.actor,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use time::macros::datetime;

    fn store_with_component() -> (SqliteEventStore, Component) {
        let mut conn = db::open_in_memory().expect("open");
        db::migrate(&mut conn).expect("migrate");
        let component = upsert_component(
            &conn,
            &ComponentUpsert {
                id: None,
                name: "api".to_string(),
                current_status: Status::Operational,
                enabled: true,
            },
        )
        .expect("component");
        (SqliteEventStore::new(conn), component)
    }

    #[test]
    fn append_updates_current_status_and_is_queryable() {
        let (store, api) = store_with_component();
        let event = store
            .append_status_change(&StatusChange {
                component_id: api.id,
                new_status: Status::MajorOutage,
                occurred_at: datetime!(2026-05-01 12:00 UTC),
                incident_id: Some(3),
                actor: Some("oncall".to_string()),
            })
            .expect("append");
        assert_eq!(event.old_status, Status::Operational);
        assert_eq!(
            store.get_component(api.id).unwrap().current_status,
            Status::MajorOutage
        );

        let batch = store
            .events_in_range(&[api.id], Window::for_day(datetime!(2026-05-01 0:00 UTC).date()))
            .expect("range");
        assert_eq!(batch.events, vec![event]);
    }

    #[test]
    fn append_without_transition_is_rejected() {
        let (store, api) = store_with_component();
        let err = store
            .append_status_change(&StatusChange {
                component_id: api.id,
                new_status: Status::Operational,
                occurred_at: datetime!(2026-05-01 12:00 UTC),
                incident_id: None,
                actor: None,
            })
            .unwrap_err();
        assert_eq!(err.code, "EVENT_NO_TRANSITION");
    }

    #[test]
    fn unknown_component_is_not_found() {
        let (store, _) = store_with_component();
        let err = store.get_component(999).unwrap_err();
        assert_eq!(err.code, "COMPONENT_NOT_FOUND");
        assert!(err.is_not_found());
    }

    #[test]
    fn corrupt_rows_are_skipped_not_fatal() {
        let (store, api) = store_with_component();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO status_events(component_id, old_status, new_status, occurred_at, occurred_ms, fingerprint, created_at) VALUES (?1, 'operational', 'exploded', 'x', ?2, 'fp-corrupt', 'x')",
                    rusqlite::params![api.id, to_unix_ms(datetime!(2026-05-01 06:00 UTC))],
                )
                .map_err(db_error("DB_WRITE_FAILED", "seed"))?;
                Ok(())
            })
            .unwrap();
        store
            .append_status_change(&StatusChange {
                component_id: api.id,
                new_status: Status::PartialOutage,
                occurred_at: datetime!(2026-05-01 08:00 UTC),
                incident_id: None,
                actor: None,
            })
            .unwrap();

        let batch = store
            .events_in_range(&[api.id], Window::for_day(datetime!(2026-05-01 0:00 UTC).date()))
            .unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].warning.code, "INTEGRITY_RECORD_SKIPPED");
    }

    #[test]
    fn last_status_before_picks_latest_prior_event() {
        let (store, api) = store_with_component();
        for (status, at) in [
            (Status::DegradedPerformance, datetime!(2026-05-01 01:00 UTC)),
            (Status::MajorOutage, datetime!(2026-05-01 02:00 UTC)),
            (Status::Operational, datetime!(2026-05-02 02:00 UTC)),
        ] {
            store
                .append_status_change(&StatusChange {
                    component_id: api.id,
                    new_status: status,
                    occurred_at: at,
                    incident_id: None,
                    actor: None,
                })
                .unwrap();
        }
        let seeds = store
            .last_statuses_before(&[api.id, 404], datetime!(2026-05-02 00:00 UTC))
            .unwrap();
        assert_eq!(seeds.statuses.get(&api.id), Some(&Status::MajorOutage));
        assert_eq!(seeds.statuses.get(&404), None);
        assert!(seeds.skipped.is_empty());
    }

    fn insert_raw_event(
        store: &SqliteEventStore,
        component_id: i64,
        new_status: &str,
        at: OffsetDateTime,
    ) {
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO status_events(component_id, old_status, new_status, occurred_at, occurred_ms, fingerprint, created_at) VALUES (?1, 'operational', ?2, 'x', ?3, ?4, 'x')",
                    rusqlite::params![
                        component_id,
                        new_status,
                        to_unix_ms(at),
                        format!("raw-{component_id}-{new_status}-{}", to_unix_ms(at))
                    ],
                )
                .map_err(db_error("DB_WRITE_FAILED", "raw insert"))?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn undecodable_latest_prior_event_falls_back_to_earlier_one() {
        let (store, api) = store_with_component();
        store
            .append_status_change(&StatusChange {
                component_id: api.id,
                new_status: Status::MajorOutage,
                occurred_at: datetime!(2026-05-01 00:00 UTC),
                incident_id: None,
                actor: None,
            })
            .unwrap();
        insert_raw_event(&store, api.id, "exploded", datetime!(2026-05-02 00:00 UTC));
        insert_raw_event(&store, api.id, "melted", datetime!(2026-05-02 06:00 UTC));

        let seeds = store
            .last_statuses_before(&[api.id], datetime!(2026-05-03 00:00 UTC))
            .unwrap();
        assert_eq!(seeds.statuses.get(&api.id), Some(&Status::MajorOutage));
        assert_eq!(seeds.skipped.len(), 2);
        assert!(seeds
            .skipped
            .iter()
            .all(|r| r.component_id == api.id && r.warning.code == "INTEGRITY_RECORD_SKIPPED"));
    }

    #[test]
    fn undecodable_tie_uses_the_decodable_row() {
        let (store, api) = store_with_component();
        let at = datetime!(2026-05-01 00:00 UTC);
        insert_raw_event(&store, api.id, "partial_outage", at);
        insert_raw_event(&store, api.id, "exploded", at);

        let seeds = store
            .last_statuses_before(&[api.id], datetime!(2026-05-02 00:00 UTC))
            .unwrap();
        assert_eq!(seeds.statuses.get(&api.id), Some(&Status::PartialOutage));
        assert_eq!(seeds.skipped.len(), 1);
    }

    #[test]
    fn component_with_invalid_status_is_listed_as_skipped() {
        let (store, api) = store_with_component();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO components(name, current_status, enabled, created_at) VALUES ('legacy', 'on_fire', 1, 'x'), ('retired', 'on_fire', 0, 'x')",
                    [],
                )
                .map_err(db_error("DB_WRITE_FAILED", "seed"))?;
                Ok(())
            })
            .unwrap();

        let all = store.list_components().unwrap();
        assert_eq!(all.components, vec![api]);
        assert_eq!(all.skipped.len(), 2);
        assert_eq!(all.skipped[0].name, "legacy");
        assert_eq!(all.skipped[0].warning.code, "INTEGRITY_COMPONENT_SKIPPED");

        let enabled = store.list_enabled_components().unwrap();
        assert_eq!(enabled.skipped.len(), 1);
        assert_eq!(enabled.skipped[0].name, "legacy");
    }
}
