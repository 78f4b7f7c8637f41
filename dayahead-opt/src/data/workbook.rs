use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use tracing::debug;

use crate::data::{RawCell, RawTable};
use crate::error::{Result, ScheduleError};

/// Extensions read through the workbook loader instead of SQLite
pub const WORKBOOK_EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

fn to_raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty | Data::Error(_) => RawCell::Empty,
        Data::Int(value) => RawCell::Integer(*value),
        Data::Float(value) => RawCell::Real(*value),
        Data::Bool(value) => RawCell::Integer(i64::from(*value)),
        // Serial date, interpreted by the normalizer
        Data::DateTime(value) => RawCell::Real(value.as_f64()),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
            RawCell::Text(text.clone())
        }
    }
}

/// Read one worksheet; the first non-empty row is the header.
///
/// Trailing fully empty rows are dropped.
pub fn load_worksheet(path: &Path, sheet: &str) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        ScheduleError::config(format!("cannot open workbook {}: {e}", path.display()))
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let name = sheet_names
        .iter()
        .find(|name| name.eq_ignore_ascii_case(sheet.trim()))
        .ok_or_else(|| {
            ScheduleError::config(format!(
                "worksheet '{sheet}' not found in {} (sheets: {})",
                path.display(),
                sheet_names.join(", ")
            ))
        })?
        .clone();

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| ScheduleError::config(format!("cannot read worksheet '{name}': {e}")))?;

    let mut rows = range
        .rows()
        .skip_while(|row| row.iter().all(|cell| matches!(cell, Data::Empty)));

    let columns: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|cell| cell.to_string().trim().to_string()).collect(),
        None => return Err(ScheduleError::config(format!("worksheet '{name}' is empty"))),
    };

    let mut data: Vec<Vec<RawCell>> = rows
        .map(|row| row.iter().map(to_raw_cell).collect())
        .collect();
    while data
        .last()
        .is_some_and(|row: &Vec<RawCell>| row.iter().all(|cell| *cell == RawCell::Empty))
    {
        data.pop();
    }

    debug!(sheet = %name, rows = data.len(), columns = columns.len(), "read worksheet");
    Ok(RawTable::new(columns, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_workbook_detection() {
        assert!(is_workbook(Path::new("upload/market.xlsx")));
        assert!(is_workbook(Path::new("MARKET.XLS")));
        assert!(is_workbook(Path::new("market.ods")));
        assert!(!is_workbook(Path::new("store.db")));
        assert!(!is_workbook(Path::new("store")));
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(to_raw_cell(&Data::Int(4)), RawCell::Integer(4));
        assert_eq!(to_raw_cell(&Data::Float(2.5)), RawCell::Real(2.5));
        assert_eq!(to_raw_cell(&Data::Bool(true)), RawCell::Integer(1));
        assert_eq!(
            to_raw_cell(&Data::String("Solar".to_string())),
            RawCell::Text("Solar".to_string())
        );
        assert_eq!(to_raw_cell(&Data::Empty), RawCell::Empty);
    }

    #[test]
    fn test_unreadable_workbook() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"not a spreadsheet").unwrap();

        let result = load_worksheet(file.path(), "Sheet1");
        assert!(matches!(result, Err(ScheduleError::Configuration(_))));
    }
}
