use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use dispatch_model::{
    BLOCKS_PER_DAY, Contract, ContractType, MINUTES_PER_BLOCK, Market, Technology, TimeBlock,
};
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::data::{RawCell, RawTable, column_key};
use crate::error::{Result, ScheduleError};

const PLANT_NAME: &str = "plantname";
const TIME_BLOCK: &str = "timeblock";
const TIME_PERIOD: &str = "timeperiod";
const SCHEDULED_MW: &str = "scheduledmw";
const AVAILABLE_MW: &str = "availablemw";
const CONTRACTED_MW: &str = "contractedmw";
const MARGINAL_COST: &str = "marginalcost";
const STORAGE_CAPACITY: &str = "storagecapacitymwh";
const TECHNOLOGY: &str = "technologytype";
const REGION: &str = "region";
const STATE: &str = "state";
const CONTRACT_TYPE: &str = "contracttype";
const CONTRACT_NAME: &str = "contractname";

const TEXT_TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const TEXT_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// What a price column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceKind {
    /// A single cleared or forecast price (`damprice`)
    Point,
    /// A percentile of the price forecast (`dam_p50`)
    Percentile(u8),
}

impl PriceKind {
    /// Scenario key the column belongs to; point prices count as the median
    pub fn scenario_key(&self) -> String {
        match self {
            PriceKind::Point => "p50".to_string(),
            PriceKind::Percentile(p) => format!("p{p:02}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceColumn {
    pub market: Market,
    pub kind: PriceKind,
    /// Column name as found in the source
    pub key: String,
}

/// One typed (plant, block) row of the input
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub plant: String,
    pub technology: Technology,
    pub region: String,
    pub state: String,
    pub contract: Contract,
    pub block: TimeBlock,
    pub time_period: Option<NaiveDateTime>,
    pub scheduled_mw: f64,
    /// `None` when the source has no available capacity column
    pub available_mw: Option<f64>,
    pub contracted_mw: Option<f64>,
    pub marginal_cost: f64,
    pub storage_capacity_mwh: Option<f64>,
    /// Prices aligned with [`NormalizedTable::price_columns`]
    pub prices: Vec<f64>,
}

impl InputRow {
    /// Capacity the plant can offer in this block before headroom
    pub fn available(&self) -> f64 {
        self.available_mw.unwrap_or(self.scheduled_mw)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedTable {
    pub rows: Vec<InputRow>,
    pub price_columns: Vec<PriceColumn>,
    pub warnings: Vec<String>,
}

impl NormalizedTable {
    /// Distinct plant names in order of first appearance
    pub fn plant_names(&self) -> Vec<&str> {
        let names: IndexSet<&str> = self.rows.iter().map(|row| row.plant.as_str()).collect();
        names.into_iter().collect()
    }

    /// Distinct time blocks in ascending order
    pub fn blocks(&self) -> Vec<TimeBlock> {
        let mut blocks: Vec<TimeBlock> = self
            .rows
            .iter()
            .map(|row| row.block)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        blocks.sort();
        blocks
    }

    pub fn has_percentiles(&self) -> bool {
        self.price_columns
            .iter()
            .any(|column| matches!(column.kind, PriceKind::Percentile(_)))
    }

    /// Scenario keys the table can be priced against, sorted
    pub fn scenario_keys(&self) -> Vec<String> {
        let percentiles = self.has_percentiles();
        let mut keys: Vec<String> = self
            .price_columns
            .iter()
            .filter(|column| !percentiles || column.kind != PriceKind::Point)
            .map(|column| column.kind.scenario_key())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        keys.sort();
        keys
    }
}

/// Recognise a market price column from its key.
///
/// Accepts `damprice`, `dam_p50` and `dam_price_p50` spellings.
fn parse_price_column(key: &str) -> Option<(Market, PriceKind)> {
    let market = Market::ALL
        .into_iter()
        .find(|market| key.starts_with(market.column_prefix()))?;
    let rest = &key[market.column_prefix().len()..];

    if rest == "price" {
        return Some((market, PriceKind::Point));
    }

    let digits = rest.strip_prefix("price").unwrap_or(rest).strip_prefix('p')?;
    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let percentile: u8 = digits.parse().ok()?;
    (1..=99)
        .contains(&percentile)
        .then_some((market, PriceKind::Percentile(percentile)))
}

/// Convert a spreadsheet serial date (days since 1899-12-30) to a timestamp
pub fn from_serial_date(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let origin = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    origin.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

fn parse_text_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_local());
    }
    for format in TEXT_TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    for format in TEXT_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Interpret a timestamp cell; unparseable values are absent
pub fn parse_timestamp(cell: &RawCell) -> Option<NaiveDateTime> {
    match cell {
        RawCell::Empty => None,
        RawCell::Integer(value) => from_serial_date(*value as f64),
        RawCell::Real(value) => from_serial_date(*value),
        RawCell::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else if let Ok(serial) = text.parse::<f64>() {
                from_serial_date(serial)
            } else {
                parse_text_timestamp(text)
            }
        }
    }
}

fn numeric(cell: &RawCell) -> f64 {
    cell.as_f64().filter(|value| value.is_finite()).unwrap_or(0.0)
}

fn optional_numeric(cell: &RawCell) -> Option<f64> {
    cell.as_f64().filter(|value| value.is_finite())
}

fn text_at(raw: &RawTable, row: usize, column: Option<usize>) -> String {
    column
        .map(|column| raw.cell(row, column).as_text())
        .unwrap_or_default()
}

/// Column positions resolved once per table
struct Columns {
    plant: usize,
    block: Option<usize>,
    period: Option<usize>,
    scheduled: usize,
    available: Option<usize>,
    contracted: Option<usize>,
    marginal_cost: Option<usize>,
    storage_capacity: Option<usize>,
    technology: Option<usize>,
    region: Option<usize>,
    state: Option<usize>,
    contract_type: Option<usize>,
    contract_name: Option<usize>,
}

impl Columns {
    fn resolve(raw: &RawTable) -> Result<Self> {
        let required = |key: &str| {
            raw.column_index(key)
                .ok_or_else(|| ScheduleError::config(format!("required column '{key}' missing")))
        };

        let block = raw.column_index(TIME_BLOCK);
        let period = raw.column_index(TIME_PERIOD);
        if block.is_none() && period.is_none() {
            return Err(ScheduleError::config(
                "required column 'timeblock' or 'timeperiod' missing",
            ));
        }

        Ok(Self {
            plant: required(PLANT_NAME)?,
            block,
            period,
            scheduled: required(SCHEDULED_MW)?,
            available: raw.column_index(AVAILABLE_MW),
            contracted: raw.column_index(CONTRACTED_MW),
            marginal_cost: raw.column_index(MARGINAL_COST),
            storage_capacity: raw.column_index(STORAGE_CAPACITY),
            technology: raw.column_index(TECHNOLOGY),
            region: raw.column_index(REGION),
            state: raw.column_index(STATE),
            contract_type: raw.column_index(CONTRACT_TYPE),
            contract_name: raw.column_index(CONTRACT_NAME),
        })
    }
}

fn resolve_block(
    raw: &RawTable,
    row: usize,
    columns: &Columns,
    time_period: Option<NaiveDateTime>,
) -> Result<Option<TimeBlock>> {
    let cell = columns
        .block
        .map(|column| raw.cell(row, column))
        .unwrap_or(&RawCell::Empty);

    if cell.as_text().is_empty() {
        return Ok(time_period.map(|period| TimeBlock::from_time_of_day(period.time())));
    }

    let index = numeric(cell);
    if index.fract() != 0.0 || index < 1.0 || index > f64::from(BLOCKS_PER_DAY) {
        return Err(ScheduleError::config(format!(
            "time block {} on row {} outside 1..={BLOCKS_PER_DAY}",
            cell.as_text(),
            row + 1
        )));
    }
    Ok(Some(TimeBlock::new(index as u32)))
}

/// Turn a raw input table into typed rows.
///
/// Declared numeric columns are coerced and fall back to 0 when a value
/// cannot be parsed. The raw table is left untouched.
pub fn normalize(raw: &RawTable, operating_date: Option<NaiveDate>) -> Result<NormalizedTable> {
    let columns = Columns::resolve(raw)?;

    let price_indices: Vec<(usize, PriceColumn)> = raw
        .columns
        .iter()
        .enumerate()
        .filter_map(|(index, name)| {
            parse_price_column(&column_key(name)).map(|(market, kind)| {
                (
                    index,
                    PriceColumn {
                        market,
                        kind,
                        key: name.clone(),
                    },
                )
            })
        })
        .collect();

    let mut rows = Vec::with_capacity(raw.rows.len());
    let mut seen: IndexMap<(String, TimeBlock), usize> = IndexMap::new();
    let mut unknown_technologies: IndexSet<String> = IndexSet::new();
    let mut unknown_contracts: IndexSet<String> = IndexSet::new();
    let mut unnamed_rows = 0usize;
    let mut unplaced_rows = 0usize;
    let mut duplicates = 0usize;

    for row in 0..raw.rows.len() {
        let plant = raw.cell(row, columns.plant).as_text();
        if plant.is_empty() {
            unnamed_rows += 1;
            continue;
        }

        let parsed_period = columns
            .period
            .and_then(|column| parse_timestamp(raw.cell(row, column)));

        let Some(block) = resolve_block(raw, row, &columns, parsed_period)? else {
            unplaced_rows += 1;
            continue;
        };

        if seen.contains_key(&(plant.clone(), block)) {
            duplicates += 1;
            continue;
        }
        seen.insert((plant.clone(), block), row);

        let time_period =
            parsed_period.or_else(|| operating_date.map(|date| block.start_on(date)));

        let technology_label = text_at(raw, row, columns.technology);
        let technology = match Technology::from_label(&technology_label) {
            Some(technology) => technology,
            None if technology_label.is_empty() => Technology::Thermal,
            None => {
                unknown_technologies.insert(technology_label);
                Technology::Thermal
            }
        };

        let contract_label = text_at(raw, row, columns.contract_type);
        let contract_type = match ContractType::from_label(&contract_label) {
            Some(contract_type) => contract_type,
            None => {
                unknown_contracts.insert(contract_label);
                ContractType::Merchant
            }
        };

        let prices = price_indices
            .iter()
            .map(|(column, _)| numeric(raw.cell(row, *column)))
            .collect();

        rows.push(InputRow {
            plant,
            technology,
            region: text_at(raw, row, columns.region),
            state: text_at(raw, row, columns.state),
            contract: Contract::new(contract_type, text_at(raw, row, columns.contract_name)),
            block,
            time_period,
            scheduled_mw: numeric(raw.cell(row, columns.scheduled)).max(0.0),
            available_mw: columns
                .available
                .map(|column| numeric(raw.cell(row, column)).max(0.0)),
            contracted_mw: columns
                .contracted
                .and_then(|column| optional_numeric(raw.cell(row, column))),
            marginal_cost: columns
                .marginal_cost
                .map(|column| numeric(raw.cell(row, column)))
                .unwrap_or(0.0),
            storage_capacity_mwh: columns
                .storage_capacity
                .and_then(|column| optional_numeric(raw.cell(row, column)))
                .filter(|capacity| *capacity > 0.0),
            prices,
        });
    }

    let mut warnings = Vec::new();
    if unnamed_rows > 0 {
        warnings.push(format!("skipped {unnamed_rows} rows without a plant name"));
    }
    if unplaced_rows > 0 {
        warnings.push(format!(
            "skipped {unplaced_rows} rows without a time block or parsable time period"
        ));
    }
    if duplicates > 0 {
        warnings.push(format!(
            "dropped {duplicates} duplicate (plant, time block) rows, first occurrence kept"
        ));
    }
    if columns.available.is_none() && rows.iter().any(|row| row.technology.is_variable()) {
        warnings.push(
            "no available capacity column, weather-dependent plants are capped at scheduled MW"
                .to_string(),
        );
    }
    for label in unknown_technologies {
        warnings.push(format!("unknown technology '{label}' treated as Thermal"));
    }
    for label in unknown_contracts {
        warnings.push(format!("unknown contract type '{label}' treated as Merchant"));
    }
    for message in &warnings {
        warn!("{message}");
    }

    debug!(
        rows = rows.len(),
        price_columns = price_indices.len(),
        minutes_per_block = MINUTES_PER_BLOCK,
        "normalized input table"
    );

    Ok(NormalizedTable {
        rows,
        price_columns: price_indices.into_iter().map(|(_, column)| column).collect(),
        warnings,
    })
}
