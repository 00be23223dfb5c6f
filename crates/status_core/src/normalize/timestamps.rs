use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::domain::IntegrityWarning;

/// Zone-less layouts accepted on import, tried in order. Values are read as UTC.
const ZONELESS_FORMATS: [&str; 4] = [
    "[year]-[month]-[day] [hour]:[minute]:[second]",
    "[year]-[month]-[day] [hour]:[minute]",
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
    "[year]-[month]-[day]T[hour]:[minute]",
];

fn parse_zoneless(raw: &str) -> Option<(OffsetDateTime, &'static str)> {
    ZONELESS_FORMATS.iter().find_map(|fmt| {
        let items = format_description::parse(fmt).ok()?;
        PrimitiveDateTime::parse(raw, &items)
            .ok()
            .map(|pdt| (pdt.assume_utc(), *fmt))
    })
}

/// Parse an imported event timestamp into UTC.
///
/// - RFC3339 is accepted as-is (converted to UTC).
/// - A small allowlist of zone-less layouts is accepted as UTC with an explicit warning.
/// - Anything else yields `None` plus a warning; no fuzzy parsing.
pub fn parse_event_timestamp(
    field: &str,
    raw_input: &str,
    warnings: &mut Vec<IntegrityWarning>,
) -> Option<OffsetDateTime> {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        warnings.push(IntegrityWarning::new(
            "INGEST_TS_MISSING",
            format!("Missing timestamp for {field}"),
        ));
        return None;
    }

    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(dt.to_offset(UtcOffset::UTC));
    }

    if let Some((dt, fmt)) = parse_zoneless(trimmed) {
        warnings.push(
            IntegrityWarning::new(
                "INGEST_TS_TZ_ASSUMED_UTC",
                format!("Assumed UTC timezone for {field}"),
            )
            .with_details(format!("value={trimmed}; fmt={fmt}")),
        );
        return Some(dt);
    }

    warnings.push(
        IntegrityWarning::new(
            "INGEST_TS_UNPARSEABLE",
            format!("Unparseable timestamp for {field}"),
        )
        .with_details(format!("raw={trimmed}")),
    );
    None
}
