use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    RunStarted,
    StageCompleted,
    RunCompleted,
    RunFailed,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::RunStarted => "run_started",
            ActivityKind::StageCompleted => "stage_completed",
            ActivityKind::RunCompleted => "run_completed",
            ActivityKind::RunFailed => "run_failed",
        }
    }
}

/// One structured activity record of a run
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub model_id: String,
    pub kind: ActivityKind,
    pub stage: Option<&'static str>,
    pub message: String,
    pub details: Value,
    pub at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(model_id: impl Into<String>, kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            kind,
            stage: None,
            message: message.into(),
            details: Value::Null,
            at: Utc::now(),
        }
    }

    pub fn stage(model_id: impl Into<String>, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            ..Self::new(model_id, ActivityKind::StageCompleted, message)
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Sink for run activity. Recording is best effort.
pub trait ActivityLog {
    fn record(&self, event: &ActivityEvent) -> anyhow::Result<()>;
}

/// Record an event, logging instead of propagating any failure
pub fn notify(log: &dyn ActivityLog, event: ActivityEvent) {
    if let Err(e) = log.record(&event) {
        warn!(
            model_id = %event.model_id,
            event = event.kind.as_str(),
            error = %e,
            "failed to record activity"
        );
    }
}

/// Emits activity as structured tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, event: &ActivityEvent) -> anyhow::Result<()> {
        info!(
            model_id = %event.model_id,
            event = event.kind.as_str(),
            stage = event.stage.unwrap_or_default(),
            details = %event.details,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Appends activity to an `ActivityLog` table in a SQLite store
pub struct SqliteActivityLog {
    conn: Mutex<Connection>,
}

impl SqliteActivityLog {
    pub fn open(path: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open activity store: {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ActivityLog (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                model_id    TEXT NOT NULL,
                event       TEXT NOT NULL,
                stage       TEXT,
                message     TEXT NOT NULL,
                details     TEXT,
                created_at  TEXT NOT NULL
            );",
        )
        .context("Failed to initialize activity log schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ActivityLog for SqliteActivityLog {
    fn record(&self, event: &ActivityEvent) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("activity log connection poisoned"))?;
        conn.execute(
            "INSERT INTO ActivityLog (model_id, event, stage, message, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.model_id,
                event.kind.as_str(),
                event.stage,
                event.message,
                event.details.to_string(),
                event.at,
            ],
        )
        .context("Failed to insert activity event")?;
        Ok(())
    }
}

/// Fans one event out to several sinks
#[derive(Default)]
pub struct ActivityLogs(Vec<Box<dyn ActivityLog>>);

impl ActivityLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, log: impl ActivityLog + 'static) -> Self {
        self.0.push(Box::new(log));
        self
    }
}

impl ActivityLog for ActivityLogs {
    /// Every sink is tried; the first failure is returned
    fn record(&self, event: &ActivityEvent) -> anyhow::Result<()> {
        let mut first_error = None;
        for log in &self.0 {
            if let Err(e) = log.record(event) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FailingLog {
        calls: Cell<usize>,
    }

    impl ActivityLog for FailingLog {
        fn record(&self, _event: &ActivityEvent) -> anyhow::Result<()> {
            self.calls.set(self.calls.get() + 1);
            Err(anyhow!("sink unreachable"))
        }
    }

    #[test]
    fn test_notify_swallows_failures() {
        let log = FailingLog {
            calls: Cell::new(0),
        };
        notify(&log, ActivityEvent::new("RMO_x", ActivityKind::RunStarted, "start"));
        assert_eq!(log.calls.get(), 1);
    }

    #[test]
    fn test_sqlite_log_appends() {
        let log = SqliteActivityLog::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        log.record(&ActivityEvent::new("RMO_x", ActivityKind::RunStarted, "start"))
            .unwrap();
        log.record(
            &ActivityEvent::stage("RMO_x", "solve", "solved")
                .with_details(serde_json::json!({"status": "optimal"})),
        )
        .unwrap();

        let conn = log.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ActivityLog", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let stage: Option<String> = conn
            .query_row(
                "SELECT stage FROM ActivityLog WHERE event = 'stage_completed'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stage.as_deref(), Some("solve"));
    }

    #[test]
    fn test_fan_out_reaches_every_sink() {
        let logs = ActivityLogs::new()
            .with(FailingLog {
                calls: Cell::new(0),
            })
            .with(TracingActivityLog);
        let result = logs.record(&ActivityEvent::new("RMO_x", ActivityKind::RunCompleted, "done"));
        assert!(result.is_err());
    }
}
