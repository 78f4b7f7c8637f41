use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

/// Number of 15-minute blocks in one operating day
pub const BLOCKS_PER_DAY: u32 = 96;
pub const MINUTES_PER_BLOCK: u32 = 15;

/// One fixed interval of the operating day.
///
/// Indices start at 1. Ordering follows the index, which matters for
/// storage technologies whose state carries from one block to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema, TS)]
#[ts(export, export_to = "./schedule.ts")]
pub struct TimeBlock {
    pub index: u32,
}

impl TimeBlock {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    /// Block containing the given wall-clock time
    pub fn from_time_of_day(time: NaiveTime) -> Self {
        let minutes = time.hour() * 60 + time.minute();
        Self::new(minutes / MINUTES_PER_BLOCK + 1)
    }

    /// Start of the block on the given operating day
    pub fn start_on(&self, date: NaiveDate) -> NaiveDateTime {
        let offset = i64::from(self.index.saturating_sub(1)) * i64::from(MINUTES_PER_BLOCK);
        date.and_time(NaiveTime::default()) + Duration::minutes(offset)
    }
}

/// Status of one solve, as written to the results table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "./schedule.ts")]
pub enum SolveStatus {
    /// Proven optimum
    Optimal,
    Infeasible,
    Unbounded,
    /// Time limit reached with an incumbent solution that is not proven optimal
    BestEffort,
    SolverError,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Unbounded => "unbounded",
            SolveStatus::BestEffort => "best_effort",
            SolveStatus::SolverError => "solver_error",
        }
    }

    /// Whether the solve produced variable values worth extracting
    pub fn has_solution(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::BestEffort)
    }
}

/// One scheduled (plant, time block) row produced by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, TS)]
#[ts(export, export_to = "./schedule.ts")]
pub struct ScheduleResult {
    pub model_id: String,
    pub plant: String,
    pub technology: String,
    pub region: String,
    pub state: String,
    pub contract_type: String,
    pub contract_name: String,
    pub time_block: u32,
    pub time_period: Option<NaiveDateTime>,
    /// Originally scheduled quantity in MW.
    pub scheduled_mw: f64,
    pub dam_mw: f64,
    pub gdam_mw: f64,
    pub rtm_mw: f64,
    /// Sum of the per-market allocations.
    pub allocated_mw: f64,
    /// Storage only: energy drawn to charge during the block.
    pub charge_mw: Option<f64>,
    /// Storage only: state of charge at the start of the block.
    pub state_of_charge: Option<f64>,
    pub dam_price: Option<f64>,
    pub gdam_price: Option<f64>,
    pub rtm_price: Option<f64>,
    /// Quantity-weighted price over the allocated markets, none when nothing is allocated.
    pub contributing_price: Option<f64>,
    /// price x quantity for this row, charging included as cost.
    pub contribution: f64,
    /// (allocated - scheduled) / scheduled, none when nothing was scheduled.
    pub deviation: Option<f64>,
}
