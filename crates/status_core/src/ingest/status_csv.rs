use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::{IntegrityWarning, Status};
use crate::error::{db_error, AppError};
use crate::normalize::timestamps::parse_event_timestamp;
use crate::store::{
    find_component_by_name, insert_event, refresh_current_status, upsert_component,
    ComponentUpsert, NewEvent,
};

/// Column headers for a status-history CSV. `incident_id` and `actor` are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCsvMapping {
    pub component: String,
    pub old_status: String,
    pub new_status: String,
    pub occurred_at: String,
    pub incident_id: Option<String>,
    pub actor: Option<String>,
}

impl Default for StatusCsvMapping {
    fn default() -> Self {
        Self {
            component: "Component".to_string(),
            old_status: "From".to_string(),
            new_status: "To".to_string(),
            occurred_at: "OccurredAt".to_string(),
            incident_id: Some("Incident".to_string()),
            actor: Some("Actor".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCsvPreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatusImportSummary {
    pub inserted: usize,
    /// Rows that could not be turned into an event.
    pub skipped: usize,
    /// Rows whose event is already stored.
    pub duplicates: usize,
    pub created_components: Vec<String>,
    pub warnings: Vec<IntegrityWarning>,
}

fn get<'a>(
    row: &'a csv::StringRecord,
    headers: &'a csv::StringRecord,
    header_name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .position(|h| h == header_name)
        .and_then(|idx| row.get(idx))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn read_headers(rdr: &mut csv::Reader<&[u8]>) -> Result<csv::StringRecord, AppError> {
    rdr.headers().cloned().map_err(|e| {
        AppError::new(
            "INGEST_STATUS_CSV_HEADERS_FAILED",
            "Failed to read status CSV headers",
        )
        .with_details(e.to_string())
    })
}

fn require_columns(headers: &csv::StringRecord, mapping: &StatusCsvMapping) -> Result<(), AppError> {
    let required = [
        &mapping.component,
        &mapping.old_status,
        &mapping.new_status,
        &mapping.occurred_at,
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !headers.iter().any(|h| h == name.as_str()))
        .map(|name| name.as_str())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(AppError::new(
        "INGEST_STATUS_CSV_COLUMNS_MISSING",
        "Status CSV is missing mapped columns",
    )
    .with_details(format!("missing={}", missing.join(","))))
}

pub fn preview_status_csv(csv_text: &str, max_rows: usize) -> Result<StatusCsvPreview, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());

    let headers = read_headers(&mut rdr)?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for result in rdr.records().take(max_rows) {
        let row = result.map_err(|e| {
            AppError::new(
                "INGEST_STATUS_CSV_PARSE_FAILED",
                "Failed to parse status CSV row",
            )
            .with_details(e.to_string())
        })?;
        rows.push(row.iter().map(|v| v.to_string()).collect::<Vec<_>>());
    }

    Ok(StatusCsvPreview { headers, rows })
}

fn parse_status(
    row_idx: usize,
    field: &str,
    raw: Option<&str>,
    warnings: &mut Vec<IntegrityWarning>,
) -> Option<Status> {
    let Some(raw) = raw else {
        warnings.push(
            IntegrityWarning::new("INGEST_STATUS_MISSING", format!("Missing {field}"))
                .with_details(format!("row={row_idx}")),
        );
        return None;
    };
    match raw.parse::<Status>() {
        Ok(s) => Some(s),
        Err(_) => {
            warnings.push(
                IntegrityWarning::new("INGEST_STATUS_UNKNOWN", format!("Unknown {field}"))
                    .with_details(format!("row={row_idx}; value={raw}")),
            );
            None
        }
    }
}

/// Import status transitions from CSV.
///
/// Unknown component names are created. Rows with an unreadable status or timestamp, or with
/// `old == new`, are skipped with a warning. Re-importing the same file inserts nothing: every
/// event carries a content fingerprint and duplicates are counted instead of stored.
/// Each touched component's `current_status` is refreshed from its latest event.
pub fn import_status_csv(
    conn: &mut Connection,
    csv_text: &str,
    mapping: &StatusCsvMapping,
) -> Result<StatusImportSummary, AppError> {
    let mut summary = StatusImportSummary::default();
    let mut touched = BTreeSet::<i64>::new();

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());
    let headers = read_headers(&mut rdr)?;
    require_columns(&headers, mapping)?;

    let tx = conn
        .transaction()
        .map_err(db_error("DB_TX_FAILED", "Failed to start import transaction"))?;

    for (row_idx, result) in rdr.records().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                summary.warnings.push(
                    IntegrityWarning::new(
                        "INGEST_STATUS_CSV_PARSE_FAILED",
                        "Failed to parse status CSV row",
                    )
                    .with_details(format!("row={row_idx}; err={e}")),
                );
                summary.skipped += 1;
                continue;
            }
        };

        let Some(name) = get(&row, &headers, &mapping.component) else {
            summary.warnings.push(
                IntegrityWarning::new("INGEST_MISSING_COMPONENT", "Row missing component name")
                    .with_details(format!("row={row_idx}")),
            );
            summary.skipped += 1;
            continue;
        };

        let old_status = parse_status(
            row_idx,
            "old status",
            get(&row, &headers, &mapping.old_status),
            &mut summary.warnings,
        );
        let new_status = parse_status(
            row_idx,
            "new status",
            get(&row, &headers, &mapping.new_status),
            &mut summary.warnings,
        );
        let occurred_at = parse_event_timestamp(
            &mapping.occurred_at,
            get(&row, &headers, &mapping.occurred_at).unwrap_or(""),
            &mut summary.warnings,
        );
        let (Some(old_status), Some(new_status), Some(occurred_at)) =
            (old_status, new_status, occurred_at)
        else {
            summary.skipped += 1;
            continue;
        };

        if old_status == new_status {
            summary.warnings.push(
                IntegrityWarning::new("INGEST_NO_TRANSITION", "Row does not change status")
                    .with_details(format!("row={row_idx}; status={new_status}")),
            );
            summary.skipped += 1;
            continue;
        }

        let incident_id = match mapping
            .incident_id
            .as_deref()
            .and_then(|h| get(&row, &headers, h))
        {
            None => None,
            Some(raw) => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(e) => {
                    summary.warnings.push(
                        IntegrityWarning::new(
                            "INGEST_INCIDENT_ID_INVALID",
                            "Ignored non-numeric incident id",
                        )
                        .with_details(format!("row={row_idx}; value={raw}; err={e}")),
                    );
                    None
                }
            },
        };
        let actor = mapping
            .actor
            .as_deref()
            .and_then(|h| get(&row, &headers, h))
            .map(|s| s.to_string());

        let component = match find_component_by_name(&tx, name)? {
            Some(c) => c,
            None => {
                let created = upsert_component(
                    &tx,
                    &ComponentUpsert {
                        id: None,
                        name: name.to_string(),
                        current_status: old_status,
                        enabled: true,
                    },
                )?;
                summary.created_components.push(created.name.clone());
                created
            }
        };

        let event = NewEvent {
            component_id: component.id,
            old_status,
            new_status,
            occurred_at,
            incident_id,
            actor,
        };
        match insert_event(&tx, &event)? {
            Some(_) => {
                summary.inserted += 1;
                touched.insert(component.id);
            }
            None => summary.duplicates += 1,
        }
    }

    for component_id in &touched {
        refresh_current_status(&tx, *component_id)?;
    }

    tx.commit()
        .map_err(db_error("DB_TX_FAILED", "Failed to commit import transaction"))?;

    tracing::info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        created = summary.created_components.len(),
        "imported status history"
    );
    Ok(summary)
}
