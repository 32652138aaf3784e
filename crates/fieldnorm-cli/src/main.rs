use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fieldnorm_core::{ExecuteReport, NormalizableField, PreviewReport, RevertReport};
use fieldnorm_engine::{connect_engine, EngineConfig, RunReportWriter};
use fieldnorm_rules::MappingTable;
use fieldnorm_web::{field_infos, AppState};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod render;

#[derive(Debug, Parser)]
#[command(name = "fieldnorm")]
#[command(about = "Normalize vendor-system fields on organization records")]
struct Cli {
    /// Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Write a report directory for each run (overrides FIELDNORM_WRITE_REPORTS).
    #[arg(long, global = true)]
    write_reports: bool,

    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,

    /// Print reports as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct FieldSelection {
    /// Restrict to these fields; repeatable. Defaults to every mapped field.
    #[arg(long = "field", value_name = "FIELD")]
    fields: Vec<NormalizableField>,
}

impl FieldSelection {
    fn as_option(&self) -> Option<&[NormalizableField]> {
        if self.fields.is_empty() {
            None
        } else {
            Some(&self.fields)
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List normalizable fields and their mapping coverage.
    Fields,
    /// Normalize a single value without touching the database.
    Normalize {
        #[arg(long)]
        field: NormalizableField,
        value: Option<String>,
    },
    /// Show the changes execute would make.
    Preview {
        #[command(flatten)]
        selection: FieldSelection,
    },
    /// Apply normalization, writing a backup row before every change.
    Execute {
        #[command(flatten)]
        selection: FieldSelection,
        /// Required; without it nothing is written.
        #[arg(long)]
        confirm: bool,
        /// Recorded on backup rows (overrides FIELDNORM_OPERATOR).
        #[arg(long)]
        operator: Option<String>,
    },
    /// Restore original values from backup rows.
    Revert {
        /// Only backups created at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Run the admin HTTP API.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_writer(config: &EngineConfig) -> Option<RunReportWriter> {
    config
        .write_reports
        .then(|| RunReportWriter::new(config.reports_dir.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(url) = cli.database_url.clone() {
        config.database_url = url;
    }
    if let Some(dir) = cli.reports_dir.clone() {
        config.reports_dir = dir;
    }
    config.write_reports |= cli.write_reports;
    init_tracing(config.log_json);

    match cli.command {
        Commands::Fields => {
            let table = MappingTable::builtin()?;
            let infos = field_infos(&table);
            if cli.json {
                print_json(&infos)?;
            } else {
                print!("{}", render::fields_table(&infos));
            }
        }
        Commands::Normalize { field, value } => {
            let table = MappingTable::builtin()?;
            let res = table.resolve(field, value.as_deref());
            if cli.json {
                print_json(&res)?;
            } else {
                println!("{}", render::resolution(field, value.as_deref(), &res));
            }
        }
        Commands::Preview { selection } => {
            let report = match connect_engine(&config).await {
                Ok(engine) => engine.preview(selection.as_option()).await,
                Err(err) => PreviewReport::failed(format!("{err:#}")),
            };
            if let Some(writer) = report_writer(&config) {
                note_report_dir(writer.write_preview(Uuid::new_v4(), &report).await);
            }
            if cli.json {
                print_json(&report)?;
            } else {
                print!("{}", render::preview(&report));
            }
            if !report.errors.is_empty() {
                bail!("preview finished with {} error(s)", report.errors.len());
            }
        }
        Commands::Execute {
            selection,
            confirm,
            operator,
        } => {
            if operator.is_some() {
                config.operator = operator;
            }
            let report = if !confirm {
                // Guard runs before any connection attempt.
                ExecuteReport::failed(fieldnorm_engine::CONFIRMATION_REQUIRED)
            } else {
                match connect_engine(&config).await {
                    Ok(engine) => engine.execute(selection.as_option(), true).await,
                    Err(err) => ExecuteReport::failed(format!("{err:#}")),
                }
            };
            if confirm {
                if let Some(writer) = report_writer(&config) {
                    note_report_dir(writer.write_execute(Uuid::new_v4(), &report).await);
                }
            }
            if cli.json {
                print_json(&report)?;
            } else {
                print!("{}", render::execute(&report));
            }
            if !report.success {
                bail!("execute finished with {} error(s)", report.errors.len());
            }
        }
        Commands::Revert { since } => {
            let report = match connect_engine(&config).await {
                Ok(engine) => engine.revert(since).await,
                Err(err) => RevertReport::failed(format!("{err:#}")),
            };
            if let Some(writer) = report_writer(&config) {
                note_report_dir(writer.write_revert(Uuid::new_v4(), &report).await);
            }
            if cli.json {
                print_json(&report)?;
            } else {
                print!("{}", render::revert(&report));
            }
            if !report.success {
                bail!("revert finished with {} error(s)", report.errors.len());
            }
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_addr.clone());
            let engine = connect_engine(&config).await?;
            let state = AppState::new(engine).with_reports(report_writer(&config));
            fieldnorm_web::serve(state, &bind).await?;
        }
    }

    Ok(())
}

fn note_report_dir(result: Result<PathBuf>) {
    match result {
        Ok(dir) => eprintln!("report written to {}", dir.display()),
        Err(err) => warn!(error = %err, "writing run report failed"),
    }
}
