use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::domain::Status;
use crate::error::{db_error, AppError};

const SETTINGS_KEY: &str = "metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMode {
    Weighted,
    Binary,
}

impl CalculationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationMode::Weighted => "weighted",
            CalculationMode::Binary => "binary",
        }
    }
}

impl fmt::Display for CalculationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uptime weight per status, each in `[0, 1]`.
///
/// Partial maps are accepted; missing statuses keep their default weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Status, f64>", into = "BTreeMap<Status, f64>")]
pub struct WeightTable {
    weights: BTreeMap<Status, f64>,
}

impl WeightTable {
    pub fn weight(&self, status: Status) -> f64 {
        self.weights.get(&status).copied().unwrap_or(0.0)
    }

    pub fn with_weight(mut self, status: Status, weight: f64) -> Self {
        self.weights.insert(status, weight);
        self
    }

    fn default_weight(status: Status) -> f64 {
        match status {
            Status::Operational => 1.0,
            Status::UnderMaintenance => 1.0,
            Status::DegradedPerformance => 0.5,
            Status::PartialOutage => 0.25,
            Status::MajorOutage => 0.0,
        }
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            weights: Status::ALL
                .into_iter()
                .map(|s| (s, Self::default_weight(s)))
                .collect(),
        }
    }
}

impl From<BTreeMap<Status, f64>> for WeightTable {
    fn from(overrides: BTreeMap<Status, f64>) -> Self {
        let mut table = WeightTable::default();
        table.weights.extend(overrides);
        table
    }
}

impl From<WeightTable> for BTreeMap<Status, f64> {
    fn from(table: WeightTable) -> Self {
        table.weights
    }
}

/// Severity rank per status; higher is worse. Independent of `WeightTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Status, u8>", into = "BTreeMap<Status, u8>")]
pub struct SeverityOrder {
    ranks: BTreeMap<Status, u8>,
}

impl SeverityOrder {
    pub fn rank(&self, status: Status) -> u8 {
        self.ranks.get(&status).copied().unwrap_or(0)
    }

    /// Highest-ranked status of the set. Equal ranks resolve to whichever status the iterator
    /// yields first, not to declaration order.
    pub fn worst(&self, statuses: impl IntoIterator<Item = Status>) -> Option<Status> {
        statuses.into_iter().fold(None, |worst, s| match worst {
            Some(w) if self.rank(w) >= self.rank(s) => Some(w),
            _ => Some(s),
        })
    }

    fn default_rank(status: Status) -> u8 {
        match status {
            Status::Operational => 0,
            Status::UnderMaintenance => 1,
            Status::DegradedPerformance => 2,
            Status::PartialOutage => 3,
            Status::MajorOutage => 4,
        }
    }
}

impl Default for SeverityOrder {
    fn default() -> Self {
        Self {
            ranks: Status::ALL
                .into_iter()
                .map(|s| (s, Self::default_rank(s)))
                .collect(),
        }
    }
}

impl From<BTreeMap<Status, u8>> for SeverityOrder {
    fn from(overrides: BTreeMap<Status, u8>) -> Self {
        let mut order = SeverityOrder::default();
        order.ranks.extend(overrides);
        order
    }
}

impl From<SeverityOrder> for BTreeMap<Status, u8> {
    fn from(order: SeverityOrder) -> Self {
        order.ranks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub duration_seconds: u64,
    /// Window lengths (days) that are cached and invalidated; other windows compute directly.
    pub tracked_windows: Vec<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_seconds: 60,
            tracked_windows: vec![7, 30, 90],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub include_maintenance_in_downtime: bool,
    pub target_percentage: f64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            include_maintenance_in_downtime: false,
            target_percentage: 99.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub calculation_mode: CalculationMode,
    pub uptime_weights: WeightTable,
    pub severity_order: SeverityOrder,
    pub cache: CacheConfig,
    pub sla: SlaConfig,
    /// Default `tracing` filter for binaries when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            calculation_mode: CalculationMode::Weighted,
            uptime_weights: WeightTable::default(),
            severity_order: SeverityOrder::default(),
            cache: CacheConfig::default(),
            sla: SlaConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        for status in Status::ALL {
            let w = self.uptime_weights.weight(status);
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(AppError::new(
                    "CONFIG_INVALID",
                    "Uptime weights must be within [0, 1]",
                )
                .with_details(format!("status={status}; weight={w}")));
            }
        }
        let target = self.sla.target_percentage;
        if !target.is_finite() || !(0.0..=100.0).contains(&target) {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "SLA target must be within [0, 100]",
            )
            .with_details(format!("target_percentage={target}")));
        }
        if self.cache.enabled && self.cache.duration_seconds == 0 {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "Cache duration must be positive when the cache is enabled",
            ));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self, AppError> {
        let config: MetricsConfig = serde_json::from_str(text).map_err(|e| {
            AppError::new("CONFIG_INVALID", "Failed to parse metrics configuration")
                .with_details(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            AppError::new("CONFIG_ENCODE_FAILED", "Failed to encode metrics configuration")
                .with_details(e.to_string())
        })
    }
}

pub fn load_config_file(path: &Path) -> Result<MetricsConfig, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::new("CONFIG_READ_FAILED", "Failed to read configuration file")
            .with_details(format!("path={}; err={e}", path.display()))
    })?;
    MetricsConfig::from_json(&text)
}

/// Configuration stored in the workspace `settings` table; defaults when absent.
pub fn load_settings(conn: &Connection) -> Result<MetricsConfig, AppError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error("DB_QUERY_FAILED", "Failed to read metrics settings"))?;

    match stored {
        Some(json) => MetricsConfig::from_json(&json),
        None => Ok(MetricsConfig::default()),
    }
}

pub fn save_settings(conn: &Connection, config: &MetricsConfig) -> Result<(), AppError> {
    config.validate()?;
    let json = config.to_json()?;
    conn.execute(
        r#"
      INSERT INTO settings(key, value_json, updated_at)
      VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
      ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at
      "#,
        rusqlite::params![SETTINGS_KEY, json],
    )
    .map_err(db_error("DB_WRITE_FAILED", "Failed to save metrics settings"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_weight_map_keeps_defaults() {
        let config = MetricsConfig::from_json(
            r#"{ "calculation_mode": "binary", "uptime_weights": { "degraded_performance": 0.8 } }"#,
        )
        .expect("parse");
        assert_eq!(config.calculation_mode, CalculationMode::Binary);
        assert_eq!(config.uptime_weights.weight(Status::DegradedPerformance), 0.8);
        assert_eq!(config.uptime_weights.weight(Status::Operational), 1.0);
        assert_eq!(config.cache.tracked_windows, vec![7, 30, 90]);
    }

    #[test]
    fn out_of_range_weight_is_rejected() {
        let err = MetricsConfig::from_json(r#"{ "uptime_weights": { "major_outage": 1.5 } }"#)
            .unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
    }

    #[test]
    fn unknown_status_key_is_rejected() {
        let err =
            MetricsConfig::from_json(r#"{ "uptime_weights": { "down": 0.0 } }"#).unwrap_err();
        assert_eq!(err.code, "CONFIG_INVALID");
    }

    #[test]
    fn worst_uses_configured_ranks() {
        let order = SeverityOrder::default();
        assert_eq!(
            order.worst([Status::UnderMaintenance, Status::DegradedPerformance]),
            Some(Status::DegradedPerformance)
        );

        let inverted = SeverityOrder::from(BTreeMap::from([(Status::UnderMaintenance, 9)]));
        assert_eq!(
            inverted.worst([Status::MajorOutage, Status::UnderMaintenance]),
            Some(Status::UnderMaintenance)
        );
    }

    #[test]
    fn worst_tie_goes_to_first_yielded() {
        let flat = SeverityOrder::from(BTreeMap::from([
            (Status::PartialOutage, 4),
            (Status::DegradedPerformance, 4),
        ]));
        assert_eq!(
            flat.worst([Status::PartialOutage, Status::DegradedPerformance]),
            Some(Status::PartialOutage)
        );
        assert_eq!(
            flat.worst([Status::DegradedPerformance, Status::PartialOutage]),
            Some(Status::DegradedPerformance)
        );
    }
}
