use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dispatch_model::SolveStatus;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::data::sqlite_source::{load_data_source, open_store};
use crate::data::workbook::{is_workbook, load_worksheet};
use crate::data::{RawTable, normalize, select_scenario};
use crate::dayahead::{
    RunContext, ScheduleMetrics, backend_for, build_model, ensure_schedulable, extract,
    solve_model,
};
use crate::error::{Result, ScheduleError};
use crate::store::{ActivityEvent, ActivityKind, ActivityLog, ResultWriter, notify};

/// Where one run reads its input and writes its schedule
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// SQLite data store or spreadsheet workbook
    pub data_store: PathBuf,
    /// `DataSource` id for SQLite stores, worksheet name for workbooks
    pub data_source_id: String,
    /// Defaults to the data store when it is a SQLite file
    pub results_store: Option<PathBuf>,
    /// Solve and report without persisting
    pub dry_run: bool,
    pub config: ScheduleConfig,
}

/// Payload printed for every run, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub model_id: Option<String>,
    pub status: Option<String>,
    pub objective_value: Option<f64>,
    pub solve_time_ms: Option<u64>,
    pub results_count: usize,
    pub scenario: String,
    pub data_source_id: String,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub warnings: Vec<String>,
    pub metrics: Option<ScheduleMetrics>,
}

impl RunReport {
    /// Report for a failure before any run context exists
    pub fn rejected(data_source_id: impl Into<String>, scenario: impl Into<String>, error: &ScheduleError) -> Self {
        Self {
            success: false,
            model_id: None,
            status: None,
            objective_value: None,
            solve_time_ms: None,
            results_count: 0,
            scenario: scenario.into(),
            data_source_id: data_source_id.into(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            warnings: Vec::new(),
            metrics: None,
        }
    }
}

/// State gathered while the pipeline advances, kept for failure reports
#[derive(Debug, Default)]
struct Progress {
    status: Option<SolveStatus>,
    objective_value: Option<f64>,
    solve_time_ms: Option<u64>,
    results_count: usize,
    warnings: Vec<String>,
    metrics: Option<ScheduleMetrics>,
}

fn open_results_store(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        ScheduleError::config(format!("cannot open results store {}: {e}", path.display()))
    })?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Load the raw input and the connection results go to
fn load_input(request: &RunRequest) -> Result<(RawTable, Option<Connection>)> {
    let busy_timeout = Duration::from_millis(request.config.persistence.busy_timeout_ms);

    if is_workbook(&request.data_store) {
        if request.results_store.is_none() && !request.dry_run {
            return Err(ScheduleError::config(
                "workbook inputs need a results store or a dry run",
            ));
        }
        let raw = load_worksheet(&request.data_store, &request.data_source_id)?;
        let results = match (&request.results_store, request.dry_run) {
            (Some(path), false) => Some(open_results_store(path, busy_timeout)?),
            _ => None,
        };
        return Ok((raw, results));
    }

    let conn = open_store(&request.data_store, busy_timeout)?;
    let raw = load_data_source(&conn, &request.data_source_id)?;
    let results = match (&request.results_store, request.dry_run) {
        (_, true) => None,
        (Some(path), false) => Some(open_results_store(path, busy_timeout)?),
        (None, false) => Some(conn),
    };
    Ok((raw, results))
}

fn execute(
    context: &RunContext,
    request: &RunRequest,
    activity: &dyn ActivityLog,
    progress: &mut Progress,
) -> Result<()> {
    let model_id = context.model_id.as_str();
    let config = &context.config;

    let backend = backend_for(&config.solver)?;

    let (raw, results_store) = load_input(request)?;
    notify(
        activity,
        ActivityEvent::stage(model_id, "load", format!("loaded {} rows", raw.rows.len())),
    );

    let table = normalize(&raw, config.operating_date)?;
    progress.warnings.extend(table.warnings.iter().cloned());
    ensure_schedulable(&table)?;
    notify(
        activity,
        ActivityEvent::stage(model_id, "normalize", format!("{} input rows", table.rows.len()))
            .with_details(json!({
                "plants": table.plant_names().len(),
                "blocks": table.blocks().len(),
            })),
    );

    let prices = select_scenario(&table, &config.scenario)?;
    notify(
        activity,
        ActivityEvent::stage(model_id, "select", format!("scenario {}", prices.scenario)),
    );

    let model = build_model(&table, &prices, &config.model)?;
    notify(
        activity,
        ActivityEvent::stage(model_id, "build", "model built").with_details(json!({
            "variables": model.variables().len(),
            "constraints": model.constraints().len(),
        })),
    );

    let solved = solve_model(&context.model_id, &model, backend.as_ref());
    let outcome = &solved.outcome;
    progress.status = Some(outcome.status());
    progress.objective_value = outcome.objective_value();
    progress.solve_time_ms = Some(outcome.solve_time_ms());
    notify(
        activity,
        ActivityEvent::stage(model_id, "solve", outcome.status().as_str()).with_details(json!({
            "backend": outcome.backend(),
            "objective_value": outcome.objective_value(),
            "solve_time_ms": outcome.solve_time_ms(),
        })),
    );

    match outcome.status() {
        SolveStatus::Optimal | SolveStatus::BestEffort => {}
        SolveStatus::Infeasible => {
            return Err(ScheduleError::InfeasibleModel {
                diagnosis: model.diagnose_infeasibility(),
            });
        }
        status => {
            return Err(ScheduleError::SolverFailure {
                status: status.as_str().to_string(),
                message: outcome.message().unwrap_or_default().to_string(),
            });
        }
    }
    if let Some(message) = outcome.message() {
        progress.warnings.push(message.to_string());
    }

    let extraction = extract(&model, &solved);
    progress.warnings.extend(extraction.metrics.warnings.iter().cloned());
    progress.metrics = Some(extraction.metrics.clone());
    progress.results_count = extraction.rows.len();

    match results_store {
        Some(mut conn) => {
            let backoff = Duration::from_millis(config.persistence.retry_backoff_ms);
            let written =
                ResultWriter::new(&mut conn, backoff).write(context, outcome, &extraction.rows)?;
            notify(
                activity,
                ActivityEvent::stage(model_id, "persist", format!("{written} rows written")),
            );
        }
        None => info!(model_id, "dry run, schedule not persisted"),
    }
    Ok(())
}

/// Run the whole pipeline once and report the outcome.
///
/// Errors never escape: every failure becomes a report with `success = false`.
pub fn run(request: &RunRequest, activity: &dyn ActivityLog) -> RunReport {
    let context = RunContext::new(request.data_source_id.clone(), request.config.clone());
    let started = Instant::now();

    notify(
        activity,
        ActivityEvent::new(
            context.model_id.as_str(),
            ActivityKind::RunStarted,
            format!("scheduling data source {}", context.data_source_id),
        )
        .with_details(json!({
            "scenario": context.config.scenario,
            "backend": context.config.solver.backend.name(),
            "trigger_time": context.trigger_time.to_rfc3339(),
        })),
    );

    let mut progress = Progress::default();
    let result = execute(&context, request, activity, &mut progress);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let mut report = RunReport {
        success: result.is_ok(),
        model_id: Some(context.model_id.to_string()),
        status: progress.status.map(|status| status.as_str().to_string()),
        objective_value: progress.objective_value,
        solve_time_ms: progress.solve_time_ms,
        results_count: progress.results_count,
        scenario: context.config.scenario.clone(),
        data_source_id: context.data_source_id.clone(),
        error: None,
        error_kind: None,
        warnings: progress.warnings,
        metrics: progress.metrics,
    };

    match result {
        Ok(()) => {
            info!(
                model_id = %context.model_id,
                status = report.status.as_deref().unwrap_or_default(),
                results = report.results_count,
                elapsed_ms,
                "run completed"
            );
            notify(
                activity,
                ActivityEvent::new(context.model_id.as_str(), ActivityKind::RunCompleted, "run completed")
                    .with_details(json!({
                        "objective_value": report.objective_value,
                        "results_count": report.results_count,
                        "elapsed_ms": elapsed_ms,
                    })),
            );
        }
        Err(e) => {
            error!(
                model_id = %context.model_id,
                kind = e.kind(),
                error = %e,
                elapsed_ms,
                "run failed"
            );
            notify(
                activity,
                ActivityEvent::new(context.model_id.as_str(), ActivityKind::RunFailed, e.to_string())
                    .with_details(json!({ "kind": e.kind() })),
            );
            report.error = Some(e.to_string());
            report.error_kind = Some(e.kind());
            // Nothing was written, so no rows count as results
            report.results_count = 0;
        }
    }
    report
}

/// One independent run per scenario, each with its own model id
pub fn run_sweep(
    request: &RunRequest,
    scenarios: &[String],
    activity: &dyn ActivityLog,
) -> Vec<RunReport> {
    scenarios
        .iter()
        .map(|scenario| {
            let mut scenario_request = request.clone();
            scenario_request.config.scenario = scenario.clone();
            run(&scenario_request, activity)
        })
        .collect()
}
