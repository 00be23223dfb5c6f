use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use status_core::config::{load_config_file, load_settings, save_settings, MetricsConfig};
use status_core::db;
use status_core::demo::seed_demo_dataset;
use status_core::domain::{Status, StatusChange};
use status_core::error::AppError;
use status_core::ingest::status_csv::{import_status_csv, StatusCsvMapping};
use status_core::report::generate_status_report_markdown;
use status_core::service::MetricsService;
use status_core::store::SqliteEventStore;

/// statusctl - uptime and daily status metrics over a status-event history
#[derive(Parser, Debug)]
#[command(name = "statusctl", version)]
struct Cli {
    /// Workspace database
    #[arg(long, env = "STATUSCTL_DB", default_value = "status.sqlite")]
    db: PathBuf,

    /// Metrics configuration (JSON). Defaults to the workspace settings.
    #[arg(long, env = "STATUSCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the workspace; with --config, store it as the workspace settings
    Init,
    /// Load the deterministic demo history ending on --anchor (default: today, UTC)
    SeedDemo {
        #[arg(long, value_parser = parse_date)]
        anchor: Option<Date>,
    },
    /// Import status transitions from a CSV file
    ImportCsv {
        path: PathBuf,
        /// Column mapping (JSON); defaults to Component,From,To,OccurredAt,Incident,Actor
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Record a status change for a component, effective now
    Record {
        component_id: i64,
        status: Status,
        #[arg(long)]
        incident: Option<i64>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Minute-weighted uptime of one component
    Uptime {
        component_id: i64,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Per-day status summaries of one component
    Timeline {
        component_id: i64,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Per-day counts of components by predominant status
    Aggregate {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Mean uptime across enabled components
    System {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Downtime budget against the configured SLA target
    Sla {
        component_id: i64,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Markdown status report
    Report {
        #[arg(long, default_value_t = 30)]
        days: u32,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn parse_date(raw: &str) -> Result<Date, String> {
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn init_tracing(config: &MetricsConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli, conn: &Connection) -> Result<MetricsConfig, AppError> {
    match &cli.config {
        Some(path) => load_config_file(path),
        None => load_settings(conn),
    }
}

fn read_text(path: &Path) -> Result<String, AppError> {
    std::fs::read_to_string(path).map_err(|e| {
        AppError::new("IO_READ_FAILED", "Failed to read input file")
            .with_details(format!("path={}; err={e}", path.display()))
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        AppError::new("OUTPUT_ENCODE_FAILED", "Failed to encode output")
            .with_details(e.to_string())
    })?;
    println!("{json}");
    Ok(())
}

fn open_service(
    conn: Connection,
    config: MetricsConfig,
) -> Result<MetricsService<SqliteEventStore>, AppError> {
    MetricsService::new(SqliteEventStore::new(conn), config)
}

fn run(cli: Cli) -> Result<(), AppError> {
    let mut conn = db::open_migrated(&cli.db)?;
    let config = load_config(&cli, &conn)?;
    init_tracing(&config);
    tracing::debug!(db = %cli.db.display(), mode = %config.calculation_mode, "workspace opened");

    match cli.command {
        Command::Init => {
            if cli.config.is_some() {
                save_settings(&conn, &config)?;
            }
            print_json(&config)
        }
        Command::SeedDemo { anchor } => {
            let anchor = anchor.unwrap_or_else(|| OffsetDateTime::now_utc().date());
            print_json(&seed_demo_dataset(&mut conn, anchor)?)
        }
        Command::ImportCsv { path, mapping } => {
            let mapping = match mapping {
                Some(p) => serde_json::from_str::<StatusCsvMapping>(&read_text(&p)?).map_err(
                    |e| {
                        AppError::new("INGEST_MAPPING_INVALID", "Failed to parse CSV mapping")
                            .with_details(e.to_string())
                    },
                )?,
                None => StatusCsvMapping::default(),
            };
            print_json(&import_status_csv(&mut conn, &read_text(&path)?, &mapping)?)
        }
        Command::Record {
            component_id,
            status,
            incident,
            actor,
        } => {
            let service = open_service(conn, config)?;
            print_json(&service.record_status_change(&StatusChange {
                component_id,
                new_status: status,
                occurred_at: OffsetDateTime::now_utc(),
                incident_id: incident,
                actor,
            })?)
        }
        Command::Uptime { component_id, days } => {
            let service = open_service(conn, config)?;
            print_json(&service.get_component_uptime(component_id, days)?)
        }
        Command::Timeline { component_id, days } => {
            let service = open_service(conn, config)?;
            print_json(&service.get_daily_status_timeline(component_id, days)?)
        }
        Command::Aggregate { days } => {
            let service = open_service(conn, config)?;
            print_json(&service.get_aggregated_status_data(days)?)
        }
        Command::System { days } => {
            let service = open_service(conn, config)?;
            print_json(&service.get_system_uptime(days)?)
        }
        Command::Sla { component_id, days } => {
            let service = open_service(conn, config)?;
            print_json(&service.get_sla_report(component_id, days)?)
        }
        Command::Report { days, out } => {
            let service = open_service(conn, config)?;
            let md = generate_status_report_markdown(&service, days, OffsetDateTime::now_utc())?;
            match out {
                Some(path) => std::fs::write(&path, md).map_err(|e| {
                    AppError::new("IO_WRITE_FAILED", "Failed to write report")
                        .with_details(format!("path={}; err={e}", path.display()))
                }),
                None => {
                    print!("{md}");
                    Ok(())
                }
            }
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match serde_json::to_string(&err) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{err}"),
            }
            ExitCode::FAILURE
        }
    }
}
