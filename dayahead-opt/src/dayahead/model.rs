use chrono::NaiveDateTime;
use dispatch_model::{Market, Plant, TimeBlock};
use indexmap::IndexMap;

use crate::config::ObjectiveSense;

/// Tolerance used when checking rows against solved values
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Position of a variable in the model arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// What a decision variable stands for.
///
/// `plant` is the position of the plant in [`ScheduleModel::plants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKey {
    /// MW sold by a plant into one market in one block
    Generation { plant: usize, block: u32, market: Market },
    /// MW drawn by a storage plant to charge during a block
    Charge { plant: usize, block: u32 },
    /// Stored energy at the start of a block
    StateOfCharge { plant: usize, block: u32 },
    /// Stored energy after the last block
    ClosingState { plant: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub key: VarKey,
    pub lower: f64,
    pub upper: Option<f64>,
    /// Coefficient in the objective under the model's sense
    pub objective: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    LessEq,
    GreaterEq,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintFamily {
    Capacity,
    DemandFloor,
    FixedDemand,
    StorageInitial,
    StorageBalance,
    ChargeLimit,
}

impl ConstraintFamily {
    pub fn label(&self) -> &'static str {
        match self {
            ConstraintFamily::Capacity => "capacity",
            ConstraintFamily::DemandFloor => "demand floor",
            ConstraintFamily::FixedDemand => "fixed demand",
            ConstraintFamily::StorageInitial => "storage initial state",
            ConstraintFamily::StorageBalance => "storage balance",
            ConstraintFamily::ChargeLimit => "charge limit",
        }
    }
}

/// `sum(coefficient * variable) <relation> rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub family: ConstraintFamily,
    pub terms: Vec<(VarId, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coefficient)| coefficient * values.get(var.0).copied().unwrap_or(0.0))
            .sum()
    }

    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let activity = self.activity(values);
        match self.relation {
            Relation::LessEq => activity <= self.rhs + tolerance,
            Relation::GreaterEq => activity >= self.rhs - tolerance,
            Relation::Equal => (activity - self.rhs).abs() <= tolerance,
        }
    }
}

/// Input of one plant in one block, after headroom and contract rules
#[derive(Debug, Clone, PartialEq)]
pub struct BlockInput {
    pub block: TimeBlock,
    pub time_period: Option<NaiveDateTime>,
    pub scheduled_mw: f64,
    pub available_mw: f64,
    /// Upper bound on the summed market allocation
    pub cap_mw: f64,
    /// Delivery obligation of fixed-demand contracts
    pub obligation_mw: Option<f64>,
    pub marginal_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantSlot {
    pub plant: Plant,
    /// Set for storage plants only
    pub storage_capacity_mwh: Option<f64>,
    pub initial_soc_mwh: Option<f64>,
    /// Keyed by block index, ascending
    pub blocks: IndexMap<u32, BlockInput>,
}

impl PlantSlot {
    pub fn is_storage(&self) -> bool {
        self.storage_capacity_mwh.is_some()
    }
}

/// A solver-agnostic linear program over an arena of variables
#[derive(Debug, Clone)]
pub struct ScheduleModel {
    pub sense: ObjectiveSense,
    pub scenario: String,
    pub plants: Vec<PlantSlot>,
    pub blocks: Vec<TimeBlock>,
    pub markets: Vec<Market>,
    /// Scenario price per (block, market)
    pub prices: IndexMap<(u32, Market), f64>,
    variables: Vec<VariableDef>,
    index: IndexMap<VarKey, VarId>,
    constraints: Vec<LinearConstraint>,
    pub warnings: Vec<String>,
}

impl ScheduleModel {
    pub fn new(sense: ObjectiveSense, scenario: impl Into<String>) -> Self {
        Self {
            sense,
            scenario: scenario.into(),
            plants: Vec::new(),
            blocks: Vec::new(),
            markets: Vec::new(),
            prices: IndexMap::new(),
            variables: Vec::new(),
            index: IndexMap::new(),
            constraints: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Register a variable; a key can only be added once
    pub fn add_variable(&mut self, def: VariableDef) -> VarId {
        if let Some(existing) = self.index.get(&def.key) {
            return *existing;
        }
        let id = VarId(self.variables.len());
        self.index.insert(def.key, id);
        self.variables.push(def);
        id
    }

    pub fn add_constraint(&mut self, constraint: LinearConstraint) {
        self.constraints.push(constraint);
    }

    pub fn var(&self, key: &VarKey) -> Option<VarId> {
        self.index.get(key).copied()
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn variable(&self, id: VarId) -> &VariableDef {
        &self.variables[id.0]
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn price(&self, block: u32, market: Market) -> Option<f64> {
        self.prices.get(&(block, market)).copied()
    }

    /// Generation variables of a plant in a block, in market order
    pub fn generation_vars(&self, plant: usize, block: u32) -> Vec<(Market, VarId)> {
        self.markets
            .iter()
            .filter_map(|market| {
                self.var(&VarKey::Generation {
                    plant,
                    block,
                    market: *market,
                })
                .map(|id| (*market, id))
            })
            .collect()
    }

    /// Rows without variables whose constant side can never hold
    pub fn trivially_infeasible(&self) -> Vec<&LinearConstraint> {
        self.constraints
            .iter()
            .filter(|constraint| {
                constraint.terms.is_empty()
                    && !constraint.is_satisfied(&[], FEASIBILITY_TOLERANCE)
            })
            .collect()
    }

    /// Explain why no feasible schedule exists.
    ///
    /// Fixed-demand obligations above their plant's cap and demand floors
    /// above the block's total cap are named directly. Anything else is an
    /// interaction of several families.
    pub fn diagnose_infeasibility(&self) -> Vec<String> {
        let mut diagnosis = Vec::new();

        for slot in &self.plants {
            for input in slot.blocks.values() {
                if let Some(obligation) = input.obligation_mw {
                    if obligation > input.cap_mw + FEASIBILITY_TOLERANCE {
                        diagnosis.push(format!(
                            "fixed demand: plant {} must deliver {:.3} MW in block {} but its capacity bound is {:.3} MW",
                            slot.plant.name, obligation, input.block.index, input.cap_mw
                        ));
                    }
                }
            }
        }

        for constraint in self
            .constraints
            .iter()
            .filter(|constraint| constraint.family == ConstraintFamily::DemandFloor)
        {
            let reachable: f64 = constraint
                .terms
                .iter()
                .filter_map(|(var, coefficient)| {
                    let def = self.variable(*var);
                    match def.key {
                        VarKey::Generation { plant, block, .. } => self
                            .plants
                            .get(plant)
                            .and_then(|slot| slot.blocks.get(&block))
                            .map(|input| ((plant, block), input.cap_mw * coefficient)),
                        _ => None,
                    }
                })
                .collect::<IndexMap<(usize, u32), f64>>()
                .values()
                .sum();
            if constraint.rhs > reachable + FEASIBILITY_TOLERANCE {
                diagnosis.push(format!(
                    "demand floor: {} requires {:.3} MW but the total capacity bound is {:.3} MW",
                    constraint.name, constraint.rhs, reachable
                ));
            }
        }

        for constraint in self.trivially_infeasible() {
            if constraint.family != ConstraintFamily::DemandFloor {
                diagnosis.push(format!(
                    "{}: {} cannot hold without any eligible variable",
                    constraint.family.label(),
                    constraint.name
                ));
            }
        }

        if diagnosis.is_empty() {
            diagnosis.push(
                "no single constraint explains it; the interaction of capacity, demand floor, fixed demand and storage constraints is too tight"
                    .to_string(),
            );
        }
        diagnosis
    }

    /// Constraints a set of values breaks by more than `tolerance`
    pub fn violations(&self, values: &[f64], tolerance: f64) -> Vec<&LinearConstraint> {
        self.constraints
            .iter()
            .filter(|constraint| !constraint.is_satisfied(values, tolerance))
            .collect()
    }
}
