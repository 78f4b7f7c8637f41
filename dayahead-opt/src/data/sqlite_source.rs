use std::path::Path;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Deserialize;
use tracing::debug;

use crate::data::{RawCell, RawTable};
use crate::error::{Result, ScheduleError};

/// JSON stored in `DataSource.config`
#[derive(Debug, Deserialize)]
struct DataSourceConfig {
    #[serde(rename = "tableName")]
    table_name: Option<String>,
}

/// Open an existing SQLite data store.
///
/// The store is never created here: a missing file is a configuration error.
pub fn open_store(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if !path.exists() {
        return Err(ScheduleError::config(format!(
            "data store not found: {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ScheduleError::config(format!("cannot open {}: {e}", path.display())))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

/// Look up the input table configured for a data source
pub fn resolve_table_name(conn: &Connection, data_source_id: &str) -> Result<String> {
    let config: Option<String> = conn
        .query_row(
            "SELECT config FROM DataSource WHERE id = ?1",
            params![data_source_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ScheduleError::config(format!("cannot read DataSource table: {e}")))?;

    let config =
        config.ok_or_else(|| ScheduleError::config(format!("data source {data_source_id} not found")))?;

    let parsed: DataSourceConfig = serde_json::from_str(&config).map_err(|e| {
        ScheduleError::config(format!("invalid config for data source {data_source_id}: {e}"))
    })?;

    match parsed.table_name {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(ScheduleError::config(format!(
            "table name not found in config of data source {data_source_id}"
        ))),
    }
}

/// Read every row of a table without interpreting the values
pub fn read_table(conn: &Connection, table: &str) -> Result<RawTable> {
    let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ScheduleError::config(format!("cannot read table {table}: {e}")))?;

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = columns.len();

    let mut rows = Vec::new();
    let mut query = stmt.query([])?;
    while let Some(row) = query.next()? {
        let mut cells = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let cell = match row.get_ref(i)? {
                ValueRef::Null => RawCell::Empty,
                ValueRef::Integer(value) => RawCell::Integer(value),
                ValueRef::Real(value) => RawCell::Real(value),
                ValueRef::Text(bytes) => RawCell::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(_) => RawCell::Empty,
            };
            cells.push(cell);
        }
        rows.push(cells);
    }

    debug!(table, rows = rows.len(), columns = column_count, "read input table");
    Ok(RawTable::new(columns, rows))
}

/// Resolve a data source and read its table
pub fn load_data_source(conn: &Connection, data_source_id: &str) -> Result<RawTable> {
    let table = resolve_table_name(conn, data_source_id)?;
    read_table(conn, &table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_source(config: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE DataSource (id TEXT PRIMARY KEY, config TEXT NOT NULL);
             CREATE TABLE market_upload (PlantName TEXT, TimeBlock INTEGER, DAMPrice REAL, ScheduledMW TEXT);
             INSERT INTO market_upload VALUES ('Alpha', 1, 3.5, '120');
             INSERT INTO market_upload VALUES ('Alpha', 2, NULL, 'n/a');",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO DataSource (id, config) VALUES ('ds1', ?1)",
            params![config],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_load_data_source() {
        let conn = store_with_source(r#"{"tableName": "market_upload"}"#);
        let table = load_data_source(&conn, "ds1").unwrap();

        assert_eq!(table.columns, vec!["PlantName", "TimeBlock", "DAMPrice", "ScheduledMW"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, 0), &RawCell::Text("Alpha".to_string()));
        assert_eq!(table.cell(0, 1), &RawCell::Integer(1));
        assert_eq!(table.cell(0, 2), &RawCell::Real(3.5));
        assert_eq!(table.cell(1, 2), &RawCell::Empty);
    }

    #[test]
    fn test_unknown_data_source() {
        let conn = store_with_source(r#"{"tableName": "market_upload"}"#);
        let result = load_data_source(&conn, "missing");
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }

    #[test]
    fn test_config_without_table_name() {
        let conn = store_with_source(r#"{"sheet": "Sheet1"}"#);
        let result = resolve_table_name(&conn, "ds1");
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }

    #[test]
    fn test_missing_table() {
        let conn = store_with_source(r#"{"tableName": "gone"}"#);
        let result = load_data_source(&conn, "ds1");
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }

    #[test]
    fn test_store_without_data_source_table() {
        let conn = Connection::open_in_memory().unwrap();
        let result = resolve_table_name(&conn, "ds1");
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }
}
