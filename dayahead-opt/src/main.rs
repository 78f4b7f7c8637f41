use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use dayahead_opt::config::{ObjectiveSense, SolverBackend};
use dayahead_opt::store::{ActivityLogs, SqliteActivityLog, TracingActivityLog};
use dayahead_opt::{RunReport, RunRequest, ScheduleConfig, ScheduleError, run, run_sweep};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dayahead-opt", version)]
#[command(about = "Schedule a generation fleet across DAM, GDAM and RTM for one operating day", long_about = None)]
struct Cli {
    /// SQLite data store or spreadsheet workbook holding the input table
    data_store: PathBuf,

    /// DataSource id for SQLite stores, worksheet name for workbooks
    data_source_id: String,

    /// TOML file with model, solver and persistence settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Forecast percentile to price the run against (p50 if unset)
    #[arg(long)]
    scenario: Option<String>,

    /// Run once per listed scenario, e.g. p10,p50,p90
    #[arg(long, value_delimiter = ',', conflicts_with = "scenario")]
    sweep: Vec<String>,

    /// LP backend: minilp, clarabel or highs
    #[arg(long)]
    solver: Option<SolverBackend>,

    /// Solver time limit in seconds
    #[arg(long)]
    time_limit: Option<f64>,

    /// minimize-cost or maximize-revenue
    #[arg(long)]
    objective: Option<ObjectiveSense>,

    /// SQLite file receiving the results; required for workbook inputs
    #[arg(long)]
    results_store: Option<PathBuf>,

    /// Also append activity events to the results store
    #[arg(long)]
    record_activity: bool,

    /// Solve and report without writing results
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    // stdout carries the JSON payload, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn build_request(cli: &Cli) -> dayahead_opt::Result<RunRequest> {
    let mut config = match &cli.config {
        Some(path) => ScheduleConfig::from_toml_file(path)?,
        None => ScheduleConfig::default(),
    };
    if let Some(scenario) = &cli.scenario {
        config.scenario = scenario.clone();
    }
    if let Some(backend) = cli.solver {
        config.solver.backend = backend;
    }
    if let Some(time_limit) = cli.time_limit {
        config.solver.time_limit_secs = time_limit;
    }
    if let Some(objective) = cli.objective {
        config.model.objective = objective;
    }
    config.validate()?;

    Ok(RunRequest {
        data_store: cli.data_store.clone(),
        data_source_id: cli.data_source_id.clone(),
        results_store: cli.results_store.clone(),
        dry_run: cli.dry_run,
        config,
    })
}

fn activity_logs(cli: &Cli, request: &RunRequest) -> ActivityLogs {
    let logs = ActivityLogs::new().with(TracingActivityLog);
    if !cli.record_activity || cli.dry_run {
        return logs;
    }

    let store = request
        .results_store
        .clone()
        .unwrap_or_else(|| request.data_store.clone());
    let busy_timeout = Duration::from_millis(request.config.persistence.busy_timeout_ms);
    match SqliteActivityLog::open(&store, busy_timeout) {
        Ok(log) => logs.with(log),
        Err(e) => {
            warn!(error = %e, "activity will only be logged, not stored");
            logs
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize run report")?;
    println!("{text}");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let error = ScheduleError::config(e.to_string());
            let _ = print_json(&RunReport::rejected("", "", &error));
            return ExitCode::FAILURE;
        }
    };

    let request = match build_request(&cli) {
        Ok(request) => request,
        Err(e) => {
            let scenario = cli.scenario.clone().unwrap_or_default();
            let _ = print_json(&RunReport::rejected(cli.data_source_id.clone(), scenario, &e));
            return ExitCode::FAILURE;
        }
    };
    let activity = activity_logs(&cli, &request);

    let (printed, success) = if cli.sweep.is_empty() {
        let report = run(&request, &activity);
        (print_json(&report), report.success)
    } else {
        let reports = run_sweep(&request, &cli.sweep, &activity);
        let success = reports.iter().all(|report| report.success);
        (print_json(&reports), success)
    };

    if let Err(e) = printed {
        eprintln!("Error writing run report: {e:#}");
        return ExitCode::FAILURE;
    }
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
