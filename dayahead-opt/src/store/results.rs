use std::thread;
use std::time::Duration;

use chrono::Utc;
use dispatch_model::ScheduleResult;
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::dayahead::{RunContext, SolveOutcome};
use crate::error::{Result, ScheduleError};

pub const RESULT_TABLE: &str = "OptimizationResult";

/// Create the results table and its idempotence key if missing.
///
/// Stores created by older tools lack the per-market columns; those are
/// added in place.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS OptimizationResult (
            id                   TEXT PRIMARY KEY,
            data_source_id       TEXT,
            model_id             TEXT NOT NULL,
            model_trigger_time   TEXT,
            time_period          TEXT,
            time_block           INTEGER NOT NULL,
            technology_type      TEXT,
            region               TEXT,
            state                TEXT,
            contract_type        TEXT,
            plant_name           TEXT NOT NULL,
            contract_name        TEXT,
            dam_price            REAL,
            gdam_price           REAL,
            rtm_price            REAL,
            scheduled_mw         REAL,
            model_results_mw     REAL,
            optimization_status  TEXT,
            solver_time_ms       INTEGER,
            objective_value      REAL,
            created_at           TEXT
        );",
    )?;

    let extension_columns = [
        ("dam_mw", "REAL"),
        ("gdam_mw", "REAL"),
        ("rtm_mw", "REAL"),
        ("charge_mw", "REAL"),
        ("state_of_charge", "REAL"),
        ("contributing_price", "REAL"),
        ("contribution", "REAL"),
        ("deviation", "REAL"),
        ("scenario", "TEXT"),
    ];
    let existing: Vec<String> = conn
        .prepare("SELECT name FROM pragma_table_info('OptimizationResult')")?
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for (column, kind) in extension_columns {
        if existing.iter().any(|name| name.eq_ignore_ascii_case(column)) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE OptimizationResult ADD COLUMN {column} {kind}"
        ))?;
    }

    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_optimization_result_key
            ON OptimizationResult(model_id, plant_name, time_block);",
    )
}

/// Writes the rows of one run inside a single transaction
pub struct ResultWriter<'a> {
    conn: &'a mut Connection,
    retry_backoff: Duration,
}

impl<'a> ResultWriter<'a> {
    pub fn new(conn: &'a mut Connection, retry_backoff: Duration) -> Self {
        Self {
            conn,
            retry_backoff,
        }
    }

    /// Upsert every row keyed by (model id, plant, time block).
    ///
    /// Either all rows become visible or none do. A failed transaction is
    /// retried once after the backoff.
    pub fn write(
        &mut self,
        context: &RunContext,
        outcome: &SolveOutcome,
        rows: &[ScheduleResult],
    ) -> Result<usize> {
        match self.write_once(context, outcome, rows) {
            Ok(written) => Ok(written),
            Err(first) => {
                warn!(
                    model_id = %context.model_id,
                    error = %first,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "result write failed, retrying once"
                );
                thread::sleep(self.retry_backoff);
                self.write_once(context, outcome, rows)
                    .map_err(ScheduleError::Persistence)
            }
        }
    }

    fn write_once(
        &mut self,
        context: &RunContext,
        outcome: &SolveOutcome,
        rows: &[ScheduleResult],
    ) -> rusqlite::Result<usize> {
        ensure_schema(self.conn)?;

        let created_at = Utc::now();
        let status = outcome.status().as_str();
        let solver_time_ms = i64::try_from(outcome.solve_time_ms()).unwrap_or(i64::MAX);

        // Dropped without commit on any error, which rolls back
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO OptimizationResult (
                    id, data_source_id, model_id, model_trigger_time, time_period, time_block,
                    technology_type, region, state, contract_type, plant_name, contract_name,
                    dam_price, gdam_price, rtm_price, scheduled_mw, model_results_mw,
                    optimization_status, solver_time_ms, objective_value, created_at,
                    dam_mw, gdam_mw, rtm_mw, charge_mw, state_of_charge,
                    contributing_price, contribution, deviation, scenario
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30
                 )
                 ON CONFLICT(model_id, plant_name, time_block) DO UPDATE SET
                    data_source_id = excluded.data_source_id,
                    model_trigger_time = excluded.model_trigger_time,
                    time_period = excluded.time_period,
                    technology_type = excluded.technology_type,
                    region = excluded.region,
                    state = excluded.state,
                    contract_type = excluded.contract_type,
                    contract_name = excluded.contract_name,
                    dam_price = excluded.dam_price,
                    gdam_price = excluded.gdam_price,
                    rtm_price = excluded.rtm_price,
                    scheduled_mw = excluded.scheduled_mw,
                    model_results_mw = excluded.model_results_mw,
                    optimization_status = excluded.optimization_status,
                    solver_time_ms = excluded.solver_time_ms,
                    objective_value = excluded.objective_value,
                    created_at = excluded.created_at,
                    dam_mw = excluded.dam_mw,
                    gdam_mw = excluded.gdam_mw,
                    rtm_mw = excluded.rtm_mw,
                    charge_mw = excluded.charge_mw,
                    state_of_charge = excluded.state_of_charge,
                    contributing_price = excluded.contributing_price,
                    contribution = excluded.contribution,
                    deviation = excluded.deviation,
                    scenario = excluded.scenario",
            )?;

            for row in rows {
                let id = format!("opt_{}_{}_{}", row.model_id, row.plant, row.time_block);
                stmt.execute(params![
                    id,
                    context.data_source_id,
                    row.model_id,
                    context.trigger_time,
                    row.time_period,
                    row.time_block,
                    row.technology,
                    row.region,
                    row.state,
                    row.contract_type,
                    row.plant,
                    row.contract_name,
                    row.dam_price,
                    row.gdam_price,
                    row.rtm_price,
                    row.scheduled_mw,
                    row.allocated_mw,
                    status,
                    solver_time_ms,
                    outcome.objective_value(),
                    created_at,
                    row.dam_mw,
                    row.gdam_mw,
                    row.rtm_mw,
                    row.charge_mw,
                    row.state_of_charge,
                    row.contributing_price,
                    row.contribution,
                    row.deviation,
                    outcome.scenario(),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            model_id = %context.model_id,
            rows = rows.len(),
            table = RESULT_TABLE,
            "persisted schedule"
        );
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ObjectiveSense, ScheduleConfig, SolverConfig};
    use crate::dayahead::{ModelId, ScheduleModel, backend_for, solve_model};

    fn outcome(model_id: &ModelId) -> SolveOutcome {
        let model = ScheduleModel::new(ObjectiveSense::MinimizeCost, "p50");
        let backend = backend_for(&SolverConfig::default()).unwrap();
        solve_model(model_id, &model, backend.as_ref()).outcome
    }

    fn row(model_id: &ModelId, plant: &str, block: u32, mw: f64) -> ScheduleResult {
        ScheduleResult {
            model_id: model_id.to_string(),
            plant: plant.to_string(),
            technology: "Thermal".to_string(),
            region: "North".to_string(),
            state: "Punjab".to_string(),
            contract_type: "Merchant".to_string(),
            contract_name: String::new(),
            time_block: block,
            time_period: None,
            scheduled_mw: 100.0,
            dam_mw: mw,
            gdam_mw: 0.0,
            rtm_mw: 0.0,
            allocated_mw: mw,
            charge_mw: None,
            state_of_charge: None,
            dam_price: Some(3.0),
            gdam_price: None,
            rtm_price: None,
            contributing_price: Some(3.0),
            contribution: 3.0 * mw,
            deviation: Some((mw - 100.0) / 100.0),
        }
    }

    fn count(conn: &Connection, model_id: &ModelId) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM OptimizationResult WHERE model_id = ?1",
            params![model_id.as_str()],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_write_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let context = RunContext::new("ds1", ScheduleConfig::default());
        let outcome = outcome(&context.model_id);
        let rows = vec![
            row(&context.model_id, "A", 1, 80.0),
            row(&context.model_id, "A", 2, 90.0),
        ];

        let mut writer = ResultWriter::new(&mut conn, Duration::ZERO);
        assert_eq!(writer.write(&context, &outcome, &rows).unwrap(), 2);

        let updated = vec![row(&context.model_id, "A", 1, 70.0)];
        writer.write(&context, &outcome, &updated).unwrap();
        writer.write(&context, &outcome, &updated).unwrap();

        assert_eq!(count(&conn, &context.model_id), 2);
        let mw: f64 = conn
            .query_row(
                "SELECT model_results_mw FROM OptimizationResult WHERE model_id = ?1 AND time_block = 1",
                params![context.model_id.as_str()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(mw, 70.0);

        let id: String = conn
            .query_row(
                "SELECT id FROM OptimizationResult WHERE model_id = ?1 AND time_block = 2",
                params![context.model_id.as_str()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(id, format!("opt_{}_A_2", context.model_id));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON OptimizationResult
             WHEN NEW.plant_name = 'POISON'
             BEGIN SELECT RAISE(ABORT, 'poisoned row'); END;",
        )
        .unwrap();

        let context = RunContext::new("ds1", ScheduleConfig::default());
        let outcome = outcome(&context.model_id);

        let mut writer = ResultWriter::new(&mut conn, Duration::ZERO);
        writer
            .write(&context, &outcome, &[row(&context.model_id, "A", 1, 80.0)])
            .unwrap();

        let poisoned = vec![
            row(&context.model_id, "A", 1, 10.0),
            row(&context.model_id, "POISON", 1, 10.0),
        ];
        let result = writer.write(&context, &outcome, &poisoned);
        assert!(matches!(result, Err(ScheduleError::Persistence(_))));

        assert_eq!(count(&conn, &context.model_id), 1);
        let mw: f64 = conn
            .query_row(
                "SELECT model_results_mw FROM OptimizationResult WHERE model_id = ?1",
                params![context.model_id.as_str()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(mw, 80.0);
    }

    #[test]
    fn test_write_retries_after_transient_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        let mut conn = Connection::open(&path).unwrap();
        conn.busy_timeout(Duration::ZERO).unwrap();

        let blocker = Connection::open(&path).unwrap();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = thread::spawn(move || {
            blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            blocker.execute_batch("COMMIT;").unwrap();
        });
        locked_rx.recv().unwrap();

        let context = RunContext::new("ds1", ScheduleConfig::default());
        let outcome = outcome(&context.model_id);
        let mut writer = ResultWriter::new(&mut conn, Duration::from_millis(750));
        let written = writer
            .write(&context, &outcome, &[row(&context.model_id, "A", 1, 80.0)])
            .unwrap();
        holder.join().unwrap();

        assert_eq!(written, 1);
        assert_eq!(count(&conn, &context.model_id), 1);
    }

    #[test]
    fn test_schema_upgrade_errors_propagate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE VIEW OptimizationResult AS SELECT 1 AS id;")
            .unwrap();

        let err = ensure_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("column"), "unexpected error: {err}");
    }

    #[test]
    fn test_schema_upgrade_adds_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE OptimizationResult (
                id TEXT PRIMARY KEY, data_source_id TEXT, model_id TEXT NOT NULL,
                model_trigger_time TEXT, time_period TEXT, time_block INTEGER NOT NULL,
                technology_type TEXT, region TEXT, state TEXT, contract_type TEXT,
                plant_name TEXT NOT NULL, contract_name TEXT, dam_price REAL, gdam_price REAL,
                rtm_price REAL, scheduled_mw REAL, model_results_mw REAL,
                optimization_status TEXT, solver_time_ms INTEGER, objective_value REAL,
                created_at TEXT
            );",
        )
        .unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('OptimizationResult')")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(columns.contains(&"dam_mw".to_string()));
        assert!(columns.contains(&"scenario".to_string()));
    }
}
