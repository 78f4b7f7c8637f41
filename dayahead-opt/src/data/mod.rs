pub mod normalize;
pub mod scenario;
pub mod sqlite_source;
pub mod workbook;

pub use normalize::{InputRow, NormalizedTable, PriceColumn, PriceKind, normalize};
pub use scenario::{ScenarioPrices, select_scenario};

/// A single untyped cell as read from the data store
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawCell {
    /// Numeric view of the cell; text is parsed, anything else is `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawCell::Empty => None,
            RawCell::Integer(value) => Some(*value as f64),
            RawCell::Real(value) => Some(*value),
            RawCell::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    /// Text view of the cell, numbers are formatted
    pub fn as_text(&self) -> String {
        match self {
            RawCell::Empty => String::new(),
            RawCell::Integer(value) => value.to_string(),
            RawCell::Real(value) => value.to_string(),
            RawCell::Text(text) => text.trim().to_string(),
        }
    }
}

/// Rows of an input table with their original column names
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<RawCell>>) -> Self {
        Self { columns, rows }
    }

    /// Position of a column, matched on [`column_key`]
    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column_key(column) == key)
    }

    pub fn cell(&self, row: usize, column: usize) -> &RawCell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&RawCell::Empty)
    }
}

/// Case-insensitive column key ignoring spaces, dashes and underscores
pub fn column_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_key() {
        assert_eq!(column_key("PlantName"), "plantname");
        assert_eq!(column_key("Scheduled MW"), "scheduledmw");
        assert_eq!(column_key("dam_p50"), "damp50");
    }

    #[test]
    fn test_cell_numeric_view() {
        assert_eq!(RawCell::Integer(4).as_f64(), Some(4.0));
        assert_eq!(RawCell::Text(" 1250.5 ".to_string()).as_f64(), Some(1250.5));
        assert_eq!(RawCell::Text("1,250".to_string()).as_f64(), None);
        assert_eq!(RawCell::Text("n/a".to_string()).as_f64(), None);
        assert_eq!(RawCell::Empty.as_f64(), None);
    }

    #[test]
    fn test_missing_cells_read_as_empty() {
        let table = RawTable::new(
            vec!["PlantName".to_string(), "TimeBlock".to_string()],
            vec![vec![RawCell::Text("A".to_string())]],
        );
        assert_eq!(table.column_index("timeblock"), Some(1));
        assert_eq!(table.cell(0, 1), &RawCell::Empty);
        assert_eq!(table.cell(5, 0), &RawCell::Empty);
    }
}
