//! Day-ahead scheduling: model formulation, solving and result extraction.

pub mod builder;
pub mod context;
pub mod extract;
pub mod model;
pub mod solver;

pub use builder::{build_model, ensure_schedulable};
pub use context::{ModelId, RunContext};
pub use extract::{Extraction, PlantDeviation, ScheduleMetrics, extract};
pub use model::ScheduleModel;
pub use solver::{BackendSolution, GoodLpBackend, LpBackend, SolveOutcome, Solved, backend_for, solve_model};
