use dispatch_model::{Market, ScheduleResult};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dayahead::model::{ScheduleModel, VarId, VarKey};
use crate::dayahead::solver::Solved;

/// Values closer to zero than this are written as zero
const ZERO_SNAP: f64 = 1e-6;
/// Slack allowed when re-checking solved values against the model rows
const RESIDUAL_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantDeviation {
    pub plant: String,
    pub time_block: u32,
    /// (allocated - scheduled) / scheduled, none when nothing was scheduled
    pub deviation: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleMetrics {
    pub objective_value: Option<f64>,
    /// Allocated MW summed over blocks, keyed by technology label
    pub technology_totals: IndexMap<String, f64>,
    pub deviations: Vec<PlantDeviation>,
    pub mean_abs_deviation: Option<f64>,
    pub min_abs_deviation: Option<f64>,
    pub max_abs_deviation: Option<f64>,
    pub omitted_rows: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub rows: Vec<ScheduleResult>,
    pub metrics: ScheduleMetrics,
}

/// Mean, min and max of absolute deviations
#[derive(Debug, Clone, Copy, PartialEq)]
struct AbsDeviation {
    mean: f64,
    min: f64,
    max: f64,
}

impl AbsDeviation {
    fn of(deviations: &[f64]) -> Option<Self> {
        if deviations.is_empty() {
            return None;
        }
        let (sum, min, max) = deviations.iter().map(|d| d.abs()).fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), d| (sum + d, min.min(d), max.max(d)),
        );
        Some(Self {
            mean: sum / deviations.len() as f64,
            min,
            max,
        })
    }
}

fn snap(value: f64) -> f64 {
    if value.abs() < ZERO_SNAP { 0.0 } else { value }
}

fn solved_value(solved: &Solved, id: VarId) -> Option<f64> {
    solved.value(id).map(snap)
}

/// Turn solved variable values into one result row per (plant, block).
///
/// A row is only emitted when every variable it depends on has a value;
/// the others are counted and reported as a warning.
pub fn extract(model: &ScheduleModel, solved: &Solved) -> Extraction {
    let model_id = solved.outcome.model_id().to_string();
    let mut rows = Vec::new();
    let mut metrics = ScheduleMetrics {
        objective_value: solved.outcome.objective_value(),
        warnings: model.warnings.clone(),
        ..ScheduleMetrics::default()
    };

    for (plant, slot) in model.plants.iter().enumerate() {
        let technology = slot.plant.technology.label().to_string();
        metrics
            .technology_totals
            .entry(technology.clone())
            .or_insert(0.0);

        for (block, input) in &slot.blocks {
            let generation = model.generation_vars(plant, *block);
            let storage = slot.is_storage().then(|| {
                (
                    model.var(&VarKey::Charge {
                        plant,
                        block: *block,
                    }),
                    model.var(&VarKey::StateOfCharge {
                        plant,
                        block: *block,
                    }),
                )
            });

            let row = (|| -> Option<ScheduleResult> {
                let mut per_market: IndexMap<Market, f64> = IndexMap::new();
                let mut contribution = 0.0;
                for (market, id) in &generation {
                    let value = solved_value(solved, *id)?;
                    per_market.insert(*market, value);
                    contribution += model.variable(*id).objective * value;
                }

                let (charge_mw, state_of_charge) = match storage {
                    Some((charge, state)) => {
                        let charge_id = charge?;
                        let charge_value = solved_value(solved, charge_id)?;
                        contribution += model.variable(charge_id).objective * charge_value;
                        let state_value = solved_value(solved, state?)?;
                        (Some(charge_value), Some(state_value))
                    }
                    None => (None, None),
                };

                let market_mw = |market: Market| per_market.get(&market).copied().unwrap_or(0.0);
                let allocated_mw = snap(per_market.values().sum());

                let weighted: f64 = per_market
                    .iter()
                    .filter_map(|(market, mw)| model.price(*block, *market).map(|p| p * mw))
                    .sum();
                let contributing_price = (allocated_mw > 0.0).then(|| weighted / allocated_mw);

                let deviation = (input.scheduled_mw > 0.0)
                    .then(|| (allocated_mw - input.scheduled_mw) / input.scheduled_mw);

                Some(ScheduleResult {
                    model_id: model_id.clone(),
                    plant: slot.plant.name.clone(),
                    technology: technology.clone(),
                    region: slot.plant.region.clone(),
                    state: slot.plant.state.clone(),
                    contract_type: slot.plant.contract.contract_type.label().to_string(),
                    contract_name: slot.plant.contract.name.clone(),
                    time_block: *block,
                    time_period: input.time_period,
                    scheduled_mw: input.scheduled_mw,
                    dam_mw: market_mw(Market::Dam),
                    gdam_mw: market_mw(Market::Gdam),
                    rtm_mw: market_mw(Market::Rtm),
                    allocated_mw,
                    charge_mw,
                    state_of_charge,
                    dam_price: model.price(*block, Market::Dam),
                    gdam_price: model.price(*block, Market::Gdam),
                    rtm_price: model.price(*block, Market::Rtm),
                    contributing_price,
                    contribution,
                    deviation,
                })
            })();

            match row {
                Some(row) => {
                    if let Some(total) = metrics.technology_totals.get_mut(&technology) {
                        *total += row.allocated_mw;
                    }
                    metrics.deviations.push(PlantDeviation {
                        plant: row.plant.clone(),
                        time_block: row.time_block,
                        deviation: row.deviation,
                    });
                    rows.push(row);
                }
                None => metrics.omitted_rows += 1,
            }
        }
    }

    let defined: Vec<f64> = metrics
        .deviations
        .iter()
        .filter_map(|entry| entry.deviation)
        .collect();
    if let Some(stats) = AbsDeviation::of(&defined) {
        metrics.mean_abs_deviation = Some(stats.mean);
        metrics.min_abs_deviation = Some(stats.min);
        metrics.max_abs_deviation = Some(stats.max);
    }

    let values: Option<Vec<f64>> = solved.values.iter().copied().collect();
    if let Some(values) = values {
        let broken = model.violations(&values, RESIDUAL_TOLERANCE);
        if let Some(first) = broken.first() {
            let message = format!(
                "{} constraints exceed the solver tolerance, first {} ({})",
                broken.len(),
                first.name,
                first.family.label()
            );
            warn!("{message}");
            metrics.warnings.push(message);
        }
    }

    if metrics.omitted_rows > 0 {
        let message = format!(
            "{} (plant, block) rows omitted because the solver returned no value for them",
            metrics.omitted_rows
        );
        warn!("{message}");
        metrics.warnings.push(message);
    }

    debug!(rows = rows.len(), omitted = metrics.omitted_rows, "extracted schedule");
    Extraction { rows, metrics }
}
