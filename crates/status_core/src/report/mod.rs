use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::domain::Status;
use crate::error::AppError;
use crate::service::MetricsService;
use crate::store::EventStore;

fn format_minutes(minutes: u64) -> String {
    let hours = minutes / 60;
    let rem = minutes % 60;
    if hours > 0 {
        format!("{hours}h {rem}m")
    } else {
        format!("{rem}m")
    }
}

fn format_pct(value: f64) -> String {
    format!("{value:.2}%")
}

/// Generate a deterministic status report for the `days` up to `now`.
///
/// Components are listed by name, then id; days oldest first. Identical store contents and
/// `now` give byte-identical output.
pub fn generate_status_report_markdown<S: EventStore + 'static>(
    service: &MetricsService<S>,
    days: u32,
    now: OffsetDateTime,
) -> Result<String, AppError> {
    let config = service.config();
    let system = service.get_system_uptime_at(days, now)?;
    let aggregate = service.get_aggregated_status_data_at(days, now)?;
    let listing = service.store().list_enabled_components()?;
    let mut components = listing.components;
    components.sort_by(|a, b| (a.name.as_str(), a.id).cmp(&(b.name.as_str(), b.id)));

    let mut out = String::new();
    out.push_str("# Status Report\n\n");
    out.push_str(&format!(
        "Window: **{days} days**, mode: **{}**, SLA target: **{}**\n\n",
        config.calculation_mode,
        format_pct(config.sla.target_percentage)
    ));

    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "- Components in scope: **{}**\n",
        system.component_count
    ));
    out.push_str(&format!(
        "- System uptime (mean of components): **{}**\n",
        format_pct(system.uptime_percentage)
    ));
    if system.skipped_components > 0 {
        out.push_str(&format!(
            "- Components skipped (undecodable): **{}**\n",
            system.skipped_components
        ));
    }
    out.push('\n');

    out.push_str("## Components\n\n");
    out.push_str("| Component | Status | Uptime | Downtime | SLA | Budget left |\n");
    out.push_str("|---|---|---:|---:|---|---:|\n");

    let mut anomalies: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for component in &components {
        let uptime = service.get_component_uptime_at(component.id, days, now)?;
        let sla = service.get_sla_report_at(component.id, days, now)?;
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.1}m |\n",
            component.name,
            component.current_status.label(),
            format_pct(uptime.uptime_percentage),
            format_minutes(uptime.downtime_minutes),
            if sla.met { "met" } else { "MISSED" },
            sla.remaining_budget_minutes
        ));

        let mut codes: Vec<String> = uptime
            .integrity
            .warnings
            .iter()
            .map(|w| w.code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        if !codes.is_empty() {
            anomalies.insert(component.name.clone(), codes);
        }
    }
    for skipped in &listing.skipped {
        anomalies
            .entry(skipped.name.clone())
            .or_default()
            .push(skipped.warning.code.clone());
    }
    out.push('\n');

    out.push_str("## Daily overview\n\n");
    out.push_str("| Date | Operational | Degraded | Partial | Major | Maintenance | Uptime |\n");
    out.push_str("|---|---:|---:|---:|---:|---:|---:|\n");
    for day in &aggregate {
        let count = |s: Status| day.counts_by_status.get(&s).copied().unwrap_or(0);
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            day.date,
            count(Status::Operational),
            count(Status::DegradedPerformance),
            count(Status::PartialOutage),
            count(Status::MajorOutage),
            count(Status::UnderMaintenance),
            format_pct(day.uptime_percentage)
        ));
    }
    out.push('\n');

    out.push_str("## Data integrity\n\n");
    if anomalies.is_empty() {
        out.push_str("No data-integrity warnings.\n");
    } else {
        for (name, codes) in &anomalies {
            out.push_str(&format!("- {name}: {}\n", codes.join(", ")));
        }
    }

    Ok(out)
}
