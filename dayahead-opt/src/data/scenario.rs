use dispatch_model::Market;
use indexmap::IndexMap;
use tracing::debug;

use crate::data::{NormalizedTable, PriceKind};
use crate::error::{Result, ScheduleError};

/// Per-block market prices under one forecast percentile
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioPrices {
    /// Normalised scenario key, e.g. `p50`
    pub scenario: String,
    /// Markets priced in this scenario, in `Market::ALL` order
    pub markets: Vec<Market>,
    prices: IndexMap<(u32, Market), f64>,
}

impl ScenarioPrices {
    pub fn price(&self, block: u32, market: Market) -> Option<f64> {
        self.prices.get(&(block, market)).copied()
    }
}

/// Canonical form of a percentile key: `P50`, `50` and `median` become `p50`
pub fn normalize_scenario_key(key: &str) -> Option<String> {
    let key = key.trim().to_ascii_lowercase();
    if key == "median" {
        return Some("p50".to_string());
    }
    let digits = key.strip_prefix('p').unwrap_or(&key);
    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let percentile: u8 = digits.parse().ok()?;
    (1..=99)
        .contains(&percentile)
        .then(|| format!("p{percentile:02}"))
}

/// Pick the price columns of one scenario and reduce them to one price per
/// (block, market).
///
/// Tables without percentile columns expose their point prices as `p50`.
/// Rows sharing a block are averaged. Calling this has no side effects, so a
/// sensitivity sweep simply calls it once per key.
pub fn select_scenario(table: &NormalizedTable, key: &str) -> Result<ScenarioPrices> {
    let available = table.scenario_keys();
    let not_found = || ScheduleError::ScenarioNotFound {
        requested: key.to_string(),
        available: available.clone(),
    };

    let scenario = normalize_scenario_key(key).ok_or_else(not_found)?;

    let wanted = if table.has_percentiles() {
        scenario[1..].parse::<u8>().ok().map(PriceKind::Percentile)
    } else if scenario == "p50" {
        Some(PriceKind::Point)
    } else {
        None
    };
    let wanted = wanted.ok_or_else(not_found)?;

    let selected: Vec<(usize, Market)> = table
        .price_columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.kind == wanted)
        .map(|(index, column)| (index, column.market))
        .collect();

    if selected.is_empty() {
        return Err(not_found());
    }

    let mut sums: IndexMap<(u32, Market), (f64, u32)> = IndexMap::new();
    for row in &table.rows {
        for (index, market) in &selected {
            let price = row.prices.get(*index).copied().unwrap_or(0.0);
            let entry = sums.entry((row.block.index, *market)).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
        }
    }

    let mut prices: IndexMap<(u32, Market), f64> = sums
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / f64::from(count)))
        .collect();
    prices.sort_keys();

    let markets: Vec<Market> = Market::ALL
        .into_iter()
        .filter(|market| selected.iter().any(|(_, selected)| selected == market))
        .collect();

    debug!(
        scenario = %scenario,
        markets = markets.len(),
        prices = prices.len(),
        "selected price scenario"
    );

    Ok(ScenarioPrices {
        scenario,
        markets,
        prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawCell, RawTable, normalize};

    fn priced_table(columns: &[&str], rows: Vec<Vec<RawCell>>) -> NormalizedTable {
        let raw = RawTable::new(columns.iter().map(|c| c.to_string()).collect(), rows);
        normalize(&raw, None).unwrap()
    }

    fn row(plant: &str, block: i64, prices: &[f64]) -> Vec<RawCell> {
        let mut cells = vec![
            RawCell::Text(plant.to_string()),
            RawCell::Integer(block),
            RawCell::Integer(100),
        ];
        cells.extend(prices.iter().map(|price| RawCell::Real(*price)));
        cells
    }

    #[test]
    fn test_scenario_key_normalisation() {
        assert_eq!(normalize_scenario_key("P50"), Some("p50".to_string()));
        assert_eq!(normalize_scenario_key("50"), Some("p50".to_string()));
        assert_eq!(normalize_scenario_key("median"), Some("p50".to_string()));
        assert_eq!(normalize_scenario_key("p5"), Some("p05".to_string()));
        assert_eq!(normalize_scenario_key("p100"), None);
        assert_eq!(normalize_scenario_key("high"), None);
    }

    #[test]
    fn test_select_percentile() {
        let table = priced_table(
            &["PlantName", "TimeBlock", "ScheduledMW", "dam_p10", "dam_p50", "gdam_p50"],
            vec![
                row("A", 1, &[1.0, 3.0, 4.0]),
                row("B", 1, &[1.0, 5.0, 6.0]),
                row("A", 2, &[2.0, 7.0, 8.0]),
            ],
        );

        let prices = select_scenario(&table, "P50").unwrap();
        assert_eq!(prices.scenario, "p50");
        assert_eq!(prices.markets, vec![Market::Dam, Market::Gdam]);
        assert_eq!(prices.price(1, Market::Dam), Some(4.0));
        assert_eq!(prices.price(1, Market::Gdam), Some(5.0));
        assert_eq!(prices.price(2, Market::Dam), Some(7.0));
        assert_eq!(prices.price(1, Market::Rtm), None);

        let low = select_scenario(&table, "p10").unwrap();
        assert_eq!(low.markets, vec![Market::Dam]);
        assert_eq!(low.price(2, Market::Dam), Some(2.0));
    }

    #[test]
    fn test_missing_percentile() {
        let table = priced_table(
            &["PlantName", "TimeBlock", "ScheduledMW", "dam_p10", "dam_p50"],
            vec![row("A", 1, &[1.0, 3.0])],
        );
        match select_scenario(&table, "p90") {
            Err(ScheduleError::ScenarioNotFound {
                requested,
                available,
            }) => {
                assert_eq!(requested, "p90");
                assert_eq!(available, vec!["p10".to_string(), "p50".to_string()]);
            }
            other => panic!("expected ScenarioNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_point_prices_are_the_median() {
        let table = priced_table(
            &["PlantName", "TimeBlock", "ScheduledMW", "DAMPrice", "RTMPrice"],
            vec![row("A", 1, &[3.0, 3.3])],
        );

        let prices = select_scenario(&table, "p50").unwrap();
        assert_eq!(prices.markets, vec![Market::Dam, Market::Rtm]);
        assert_eq!(prices.price(1, Market::Rtm), Some(3.3));

        let result = select_scenario(&table, "p90");
        assert!(matches!(result, Err(ScheduleError::ScenarioNotFound { .. })));
    }

    #[test]
    fn test_no_price_columns() {
        let table = priced_table(
            &["PlantName", "TimeBlock", "ScheduledMW"],
            vec![row("A", 1, &[])],
        );
        let result = select_scenario(&table, "p50");
        assert!(matches!(result, Err(ScheduleError::ScenarioNotFound { .. })));
    }
}
