mod breakdown;
mod config;
mod csv;
mod data_dir;
mod discovery;
mod extract;
mod pipeline;
mod record;
mod run_state;
mod sink;
mod summary;

use clap::Parser;
use config::{Overrides, Settings};
use sink::{GoogleEndpoints, GoogleSheets};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "metricsheet.toml";

/// Summarize benchmark metric snapshots: reduce each run's JSON snapshot
/// files to a summary row, write per-node/per-job breakdown tables, and
/// optionally upload everything to a spreadsheet.
#[derive(Parser, Debug)]
#[command(name = "metricsheet", version, about)]
pub struct Cli {
    /// Run identifier used to select snapshot files
    #[arg(long)]
    uuid: Option<String>,

    /// Spreadsheet parent folder id (requires --gdocs)
    #[arg(long)]
    parent: Option<String>,

    /// Upload the summary and breakdown tables to Google Sheets
    #[arg(long)]
    gdocs: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the JSON snapshot files (overrides config)
    #[arg(short, long)]
    metrics_dir: Option<PathBuf>,

    /// Output directory for tables and run state (overrides config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Convert a single snapshot file into a breakdown CSV and exit
    #[arg(long, value_name = "JSON")]
    json: Option<PathBuf>,

    /// Destination for --json conversion
    #[arg(long, default_value = "output.csv", requires = "json")]
    csv: PathBuf,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-file decode and placement decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    if let Some(source) = &cli.json {
        return match breakdown::convert_file(source, &cli.csv) {
            Ok(dest) => {
                tracing::info!(file = %dest.display(), "finished creating csv file");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "conversion failed");
                ExitCode::FAILURE
            }
        };
    }

    let (config_path, explicit) = match &cli.config {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };
    let file_config = match config::load(&config_path, explicit) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let overrides = Overrides {
        run_id: cli.uuid.clone(),
        parent_id: cli.parent.clone(),
        upload: cli.gdocs,
        metrics_dir: cli.metrics_dir.clone(),
        output_dir: cli.output_dir.clone(),
    };
    let settings = match Settings::resolve(file_config, overrides, |var| std::env::var(var).ok()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "invalid arguments");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        println!("run id:         {}", settings.run_id);
        println!("metrics dir:    {}", settings.metrics_dir.display());
        println!("output dir:     {}", settings.output_dir.display());
        println!("summary tags:   {}", settings.summary_tags.join(", "));
        println!("breakdown tags: {}", settings.breakdown_tags.join(", "));
        match &settings.upload {
            Some(u) => println!("upload:         parent {}, sheet {}", u.parent_id, u.summary_sheet),
            None => println!("upload:         disabled"),
        }
        return ExitCode::SUCCESS;
    }

    let sink = match &settings.upload {
        Some(u) => match GoogleSheets::new(GoogleEndpoints {
            sheets_base: u.sheets_base.clone(),
            drive_base: u.drive_base.clone(),
            access_token: u.access_token.clone(),
        }) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::error!(error = %e, "failed to create spreadsheet client");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let day = data_dir::today();
    match pipeline::run(&settings, &day, sink.as_ref()).await {
        Ok(report) => {
            tracing::info!(
                iteration = %report.iteration,
                summary = %report.summary_table.display(),
                columns = report.row.fields().iter().filter(|f| !f.is_empty()).count(),
                breakdown_tables = report.breakdown_tables.len(),
                spreadsheet_id = report.spreadsheet_id.as_deref().unwrap_or("-"),
                "completed successfully"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
