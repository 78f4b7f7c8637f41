use dispatch_model::{Market, Plant};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::{FixedDemandMode, ModelConfig, ObjectiveSense};
use crate::data::{NormalizedTable, ScenarioPrices};
use crate::dayahead::model::{
    BlockInput, ConstraintFamily, LinearConstraint, PlantSlot, Relation, ScheduleModel, VarKey,
    VariableDef,
};
use crate::error::{Result, ScheduleError};

/// Refuse tables with nothing to schedule, before any model is built
pub fn ensure_schedulable(table: &NormalizedTable) -> Result<()> {
    if table.rows.is_empty() {
        return Err(ScheduleError::EmptyInput(
            "input table has no plants and no time blocks".to_string(),
        ));
    }
    if table.plant_names().is_empty() {
        return Err(ScheduleError::EmptyInput("input table has no plants".to_string()));
    }
    if table.blocks().is_empty() {
        return Err(ScheduleError::EmptyInput(
            "input table has no time blocks".to_string(),
        ));
    }
    Ok(())
}

/// Group the normalized rows into one slot per plant
fn plant_slots(table: &NormalizedTable, config: &ModelConfig) -> Vec<PlantSlot> {
    let mut slots: IndexMap<String, PlantSlot> = IndexMap::new();

    for row in &table.rows {
        let slot = slots.entry(row.plant.clone()).or_insert_with(|| {
            let mut plant = Plant::new(row.plant.clone(), row.technology, row.contract.clone());
            plant.region = row.region.clone();
            plant.state = row.state.clone();
            PlantSlot {
                plant,
                storage_capacity_mwh: None,
                initial_soc_mwh: None,
                blocks: IndexMap::new(),
            }
        });

        let available = row.available();
        let obligation = slot
            .plant
            .contract
            .contract_type
            .has_fixed_demand()
            .then(|| row.contracted_mw.unwrap_or(row.scheduled_mw));

        slot.blocks.insert(
            row.block.index,
            BlockInput {
                block: row.block,
                time_period: row.time_period,
                scheduled_mw: row.scheduled_mw,
                available_mw: available,
                cap_mw: available * config.capacity_headroom,
                obligation_mw: obligation,
                marginal_cost: row.marginal_cost,
            },
        );

        if slot.plant.technology.is_storage() && slot.storage_capacity_mwh.is_none() {
            slot.storage_capacity_mwh = row.storage_capacity_mwh;
        }
    }

    let mut slots: Vec<PlantSlot> = slots.into_values().collect();
    for slot in &mut slots {
        slot.blocks.sort_keys();
        if slot.plant.technology.is_storage() {
            // Without a declared energy capacity, one hour at the largest available MW
            let capacity = slot.storage_capacity_mwh.unwrap_or_else(|| {
                slot.blocks
                    .values()
                    .map(|input| input.available_mw)
                    .fold(0.0, f64::max)
            });
            slot.storage_capacity_mwh = Some(capacity);
            slot.initial_soc_mwh = Some(capacity * config.initial_soc_fraction);
        }
    }
    slots
}

/// Price paid for charging storage in a block
fn charge_price(prices: &ScenarioPrices, block: u32) -> f64 {
    prices
        .price(block, Market::Dam)
        .or_else(|| {
            prices
                .markets
                .first()
                .and_then(|market| prices.price(block, *market))
        })
        .unwrap_or(0.0)
}

/// Formulate the scheduling LP for one scenario.
///
/// Generation variables exist only for markets priced in the scenario that
/// the plant's contract permits. The result is independent of any solver.
pub fn build_model(
    table: &NormalizedTable,
    prices: &ScenarioPrices,
    config: &ModelConfig,
) -> Result<ScheduleModel> {
    ensure_schedulable(table)?;

    let mut model = ScheduleModel::new(config.objective, prices.scenario.clone());
    model.plants = plant_slots(table, config);
    model.blocks = table.blocks();
    model.markets = prices.markets.clone();
    for block in &model.blocks {
        for market in &prices.markets {
            if let Some(price) = prices.price(block.index, *market) {
                model.prices.insert((block.index, *market), price);
            }
        }
    }

    let efficiency = config.storage_efficiency;
    let slots = model.plants.clone();

    for (plant, slot) in slots.iter().enumerate() {
        let contract = slot.plant.contract.contract_type;
        let eligible: Vec<Market> = prices
            .markets
            .iter()
            .copied()
            .filter(|market| contract.permits(*market))
            .collect();
        if eligible.is_empty() {
            let priced: Vec<&str> = prices.markets.iter().map(Market::code).collect();
            model.warnings.push(format!(
                "plant {} has no market eligible under its {} contract in scenario {} (priced: {})",
                slot.plant.name,
                contract.label(),
                prices.scenario,
                priced.join(", ")
            ));
        }

        for (block, input) in &slot.blocks {
            let mut allocation = Vec::with_capacity(eligible.len());
            for market in &eligible {
                let Some(price) = prices.price(*block, *market) else {
                    continue;
                };
                let objective = match config.objective {
                    ObjectiveSense::MinimizeCost => price,
                    ObjectiveSense::MaximizeRevenue => price - input.marginal_cost,
                };
                let id = model.add_variable(VariableDef {
                    key: VarKey::Generation {
                        plant,
                        block: *block,
                        market: *market,
                    },
                    lower: 0.0,
                    upper: Some(input.cap_mw),
                    objective,
                });
                allocation.push((id, 1.0));
            }

            model.add_constraint(LinearConstraint {
                name: format!("capacity[{},{}]", slot.plant.name, block),
                family: ConstraintFamily::Capacity,
                terms: allocation.clone(),
                relation: Relation::LessEq,
                rhs: input.cap_mw,
            });

            if let Some(obligation) = input.obligation_mw {
                let relation = match config.fixed_demand {
                    FixedDemandMode::AtLeast => Relation::GreaterEq,
                    FixedDemandMode::Exact => Relation::Equal,
                };
                model.add_constraint(LinearConstraint {
                    name: format!("fixed_demand[{},{}]", slot.plant.name, block),
                    family: ConstraintFamily::FixedDemand,
                    terms: allocation,
                    relation,
                    rhs: obligation,
                });
            }
        }

        if let Some(capacity) = slot.storage_capacity_mwh {
            add_storage(&mut model, plant, slot, capacity, efficiency, prices, config);
        }
    }

    add_demand_floor(&mut model, &slots, config.demand_floor);

    info!(
        scenario = %model.scenario,
        plants = model.plants.len(),
        blocks = model.blocks.len(),
        variables = model.variables().len(),
        constraints = model.constraints().len(),
        "built schedule model"
    );
    Ok(model)
}

/// Charge and state-of-charge variables and the block-to-block balance
fn add_storage(
    model: &mut ScheduleModel,
    plant: usize,
    slot: &PlantSlot,
    capacity: f64,
    efficiency: f64,
    prices: &ScenarioPrices,
    config: &ModelConfig,
) {
    let name = &slot.plant.name;
    let initial = slot.initial_soc_mwh.unwrap_or(0.0);
    let blocks: Vec<(u32, f64)> = slot
        .blocks
        .iter()
        .map(|(block, input)| (*block, input.cap_mw))
        .collect();

    let mut states = Vec::with_capacity(blocks.len() + 1);
    for (block, cap) in &blocks {
        let price = charge_price(prices, *block);
        let objective = match config.objective {
            ObjectiveSense::MinimizeCost => price,
            ObjectiveSense::MaximizeRevenue => -price,
        };
        let charge = model.add_variable(VariableDef {
            key: VarKey::Charge {
                plant,
                block: *block,
            },
            lower: 0.0,
            upper: None,
            objective,
        });
        model.add_constraint(LinearConstraint {
            name: format!("charge_limit[{name},{block}]"),
            family: ConstraintFamily::ChargeLimit,
            terms: vec![(charge, 1.0)],
            relation: Relation::LessEq,
            rhs: *cap,
        });

        let state = model.add_variable(VariableDef {
            key: VarKey::StateOfCharge {
                plant,
                block: *block,
            },
            lower: 0.0,
            upper: Some(capacity),
            objective: 0.0,
        });
        states.push((*block, state, charge));
    }

    let closing = model.add_variable(VariableDef {
        key: VarKey::ClosingState { plant },
        lower: 0.0,
        upper: Some(capacity),
        objective: 0.0,
    });

    if let Some((block, first, _)) = states.first() {
        model.add_constraint(LinearConstraint {
            name: format!("storage_initial[{name},{block}]"),
            family: ConstraintFamily::StorageInitial,
            terms: vec![(*first, 1.0)],
            relation: Relation::Equal,
            rhs: initial,
        });
    }

    // next = current + charge * eff - discharge / eff
    for (position, (block, state, charge)) in states.iter().enumerate() {
        let next = states
            .get(position + 1)
            .map(|(_, next, _)| *next)
            .unwrap_or(closing);
        let mut terms = vec![(next, 1.0), (*state, -1.0), (*charge, -efficiency)];
        terms.extend(
            model
                .generation_vars(plant, *block)
                .into_iter()
                .map(|(_, id)| (id, 1.0 / efficiency)),
        );
        model.add_constraint(LinearConstraint {
            name: format!("storage_balance[{name},{block}]"),
            family: ConstraintFamily::StorageBalance,
            terms,
            relation: Relation::Equal,
            rhs: 0.0,
        });
    }

    debug!(plant = %name, capacity, initial, "added storage coupling");
}

/// Per block, total allocation must reach a share of the scheduled total
fn add_demand_floor(model: &mut ScheduleModel, slots: &[PlantSlot], floor: f64) {
    let blocks = model.blocks.clone();
    for block in blocks {
        let scheduled: f64 = slots
            .iter()
            .filter_map(|slot| slot.blocks.get(&block.index))
            .map(|input| input.scheduled_mw)
            .sum();
        let required = floor * scheduled;
        if required <= 0.0 {
            continue;
        }

        let terms = (0..slots.len())
            .flat_map(|plant| model.generation_vars(plant, block.index))
            .map(|(_, id)| (id, 1.0))
            .collect();
        model.add_constraint(LinearConstraint {
            name: format!("demand_floor[{}]", block.index),
            family: ConstraintFamily::DemandFloor,
            terms,
            relation: Relation::GreaterEq,
            rhs: required,
        });
    }
}
