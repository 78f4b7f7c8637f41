pub mod activity;
pub mod results;

pub use activity::{ActivityEvent, ActivityKind, ActivityLog, ActivityLogs, SqliteActivityLog, TracingActivityLog, notify};
pub use results::{RESULT_TABLE, ResultWriter, ensure_schema};
