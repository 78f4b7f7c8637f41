use std::time::{Duration, Instant};

use dispatch_model::SolveStatus;
use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, Solver, SolverModel, Variable,
    constraint, variable,
};
use tracing::{info, warn};

use crate::config::{ObjectiveSense, SolverBackend, SolverConfig};
use crate::dayahead::context::ModelId;
use crate::dayahead::model::{Relation, ScheduleModel, VarId, VariableDef};
use crate::error::{Result, ScheduleError};

/// Reason good_lp gives when a backend stops at its time limit without a solution
const TIME_LIMIT_REACHED: &str = "Time limit reached";

/// Raw result of handing a model to a backend
#[derive(Debug, Clone)]
pub struct BackendSolution {
    pub status: SolveStatus,
    /// One value per model variable, present when the status has a solution
    pub values: Option<Vec<f64>>,
    /// Wall-clock time of the delegated solve call only
    pub elapsed: Duration,
    pub message: Option<String>,
}

impl BackendSolution {
    fn failed(status: SolveStatus, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            status,
            values: None,
            elapsed,
            message: Some(message.into()),
        }
    }
}

/// A linear programming backend.
///
/// Implementations own their solver state for a single call, so one backend
/// can serve independent runs without sharing a model between them.
pub trait LpBackend {
    fn name(&self) -> &'static str;
    fn solve(&self, model: &ScheduleModel) -> BackendSolution;
}

/// Backends reachable through `good_lp`
#[derive(Debug, Clone)]
pub struct GoodLpBackend {
    backend: SolverBackend,
    time_limit: Duration,
    verbose: bool,
    threads: Option<u32>,
}

impl GoodLpBackend {
    pub fn new(config: &SolverConfig) -> Result<Self> {
        if config.backend == SolverBackend::Highs && !cfg!(feature = "highs") {
            return Err(ScheduleError::SolverUnavailable {
                backend: config.backend.name().to_string(),
                reason: "this build does not include the `highs` feature".to_string(),
            });
        }
        Ok(Self {
            backend: config.backend,
            time_limit: config.time_limit(),
            verbose: config.verbose,
            threads: config.threads,
        })
    }

    #[cfg(feature = "highs")]
    fn solve_highs(&self, model: &ScheduleModel) -> BackendSolution {
        let time_limit = self.time_limit.as_secs_f64();
        let verbose = self.verbose;
        let threads = self.threads;
        solve_with(model, good_lp::solvers::highs::highs, move |lp| {
            let mut lp = lp.set_time_limit(time_limit);
            lp.set_verbose(verbose);
            match threads {
                Some(threads) => lp.set_threads(threads),
                None => lp,
            }
        })
    }

    fn solve_clarabel(&self, model: &ScheduleModel) -> BackendSolution {
        let time_limit = self.time_limit.as_secs_f64();
        let verbose = self.verbose;
        solve_with(model, good_lp::solvers::clarabel::clarabel, move |mut lp| {
            lp.settings().time_limit(time_limit).verbose(verbose);
            lp
        })
    }

    #[cfg(not(feature = "highs"))]
    fn solve_highs(&self, _model: &ScheduleModel) -> BackendSolution {
        BackendSolution::failed(
            SolveStatus::SolverError,
            Duration::ZERO,
            "this build does not include the `highs` feature",
        )
    }
}

impl LpBackend for GoodLpBackend {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn solve(&self, model: &ScheduleModel) -> BackendSolution {
        if self.verbose {
            info!(
                backend = self.name(),
                variables = model.variables().len(),
                constraints = model.constraints().len(),
                time_limit_secs = self.time_limit.as_secs_f64(),
                threads = ?self.threads,
                "handing model to solver"
            );
        }

        let mut solution = match self.backend {
            SolverBackend::Minilp => solve_with(model, good_lp::solvers::minilp::minilp, |lp| lp),
            SolverBackend::Clarabel => self.solve_clarabel(model),
            SolverBackend::Highs => self.solve_highs(model),
        };

        // An incumbent returned at the time limit is not a proven optimum.
        // Clarabel reports the limit as an error, so its successes are proven.
        if self.backend != SolverBackend::Clarabel
            && solution.status == SolveStatus::Optimal
            && solution.elapsed >= self.time_limit
        {
            solution.status = SolveStatus::BestEffort;
            solution.message = Some(format!(
                "time limit of {:.1}s reached, solution not proven optimal",
                self.time_limit.as_secs_f64()
            ));
        }
        solution
    }
}

/// Resolve the configured backend, failing fast when it is not compiled in
pub fn backend_for(config: &SolverConfig) -> Result<Box<dyn LpBackend>> {
    Ok(Box::new(GoodLpBackend::new(config)?))
}

/// Translate the arena into a `good_lp` problem and solve it
fn solve_with<S>(
    model: &ScheduleModel,
    solver: S,
    configure: impl FnOnce(S::Model) -> S::Model,
) -> BackendSolution
where
    S: Solver,
    S::Model: SolverModel<Error = ResolutionError>,
{
    let mut problem = ProblemVariables::new();
    let vars: Vec<Variable> = model
        .variables()
        .iter()
        .map(|def| {
            let definition = variable().min(def.lower);
            match def.upper {
                Some(upper) => problem.add(definition.max(upper)),
                None => problem.add(definition),
            }
        })
        .collect();

    let mut objective = Expression::from(0.0);
    for (def, var) in model.variables().iter().zip(&vars) {
        if def.objective != 0.0 {
            objective += *var * def.objective;
        }
    }

    let unsolved = match model.sense {
        ObjectiveSense::MinimizeCost => problem.minimise(objective),
        ObjectiveSense::MaximizeRevenue => problem.maximise(objective),
    };
    let mut lp = configure(unsolved.using(solver));

    for row in model.constraints() {
        // Constant rows are checked before solving
        if row.terms.is_empty() {
            continue;
        }
        let mut lhs = Expression::from(0.0);
        for (id, coefficient) in &row.terms {
            lhs += vars[id.0] * *coefficient;
        }
        let rhs = row.rhs;
        lp = match row.relation {
            Relation::LessEq => lp.with(constraint!(lhs <= rhs)),
            Relation::GreaterEq => lp.with(constraint!(lhs >= rhs)),
            Relation::Equal => lp.with(constraint!(lhs == rhs)),
        };
    }

    let start = Instant::now();
    let result = lp.solve();
    let elapsed = start.elapsed();

    match result {
        Ok(solution) => BackendSolution {
            status: SolveStatus::Optimal,
            values: Some(vars.iter().map(|var| solution.value(*var)).collect()),
            elapsed,
            message: None,
        },
        Err(ResolutionError::Infeasible) => {
            BackendSolution::failed(SolveStatus::Infeasible, elapsed, "problem is infeasible")
        }
        Err(ResolutionError::Unbounded) => {
            BackendSolution::failed(SolveStatus::Unbounded, elapsed, "problem is unbounded")
        }
        Err(ResolutionError::Other(TIME_LIMIT_REACHED)) => BackendSolution::failed(
            SolveStatus::SolverError,
            elapsed,
            "time limit reached without incumbent",
        ),
        Err(other) => BackendSolution::failed(SolveStatus::SolverError, elapsed, other.to_string()),
    }
}

/// Pull a solved value back inside its variable bounds.
///
/// Interior-point backends stop within their own tolerance of a bound.
fn within_bounds(def: &VariableDef, value: f64) -> f64 {
    let value = value.max(def.lower);
    match def.upper {
        Some(upper) => value.min(upper),
        None => value,
    }
}

/// Immutable summary of one solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    model_id: ModelId,
    scenario: String,
    status: SolveStatus,
    objective_value: Option<f64>,
    solve_duration: Duration,
    backend: String,
    message: Option<String>,
}

impl SolveOutcome {
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    pub fn objective_value(&self) -> Option<f64> {
        self.objective_value
    }

    pub fn solve_duration(&self) -> Duration {
        self.solve_duration
    }

    pub fn solve_time_ms(&self) -> u64 {
        u64::try_from(self.solve_duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Outcome plus the per-variable values it was computed from
#[derive(Debug, Clone)]
pub struct Solved {
    pub outcome: SolveOutcome,
    /// Indexed by `VarId`; `None` where the solver gave no finite value
    pub values: Vec<Option<f64>>,
}

impl Solved {
    pub fn value(&self, id: VarId) -> Option<f64> {
        self.values.get(id.0).copied().flatten()
    }
}

/// Solve a built model and summarise the result
pub fn solve_model(model_id: &ModelId, model: &ScheduleModel, backend: &dyn LpBackend) -> Solved {
    let impossible = model.trivially_infeasible();
    let solution = if !impossible.is_empty() {
        BackendSolution::failed(
            SolveStatus::Infeasible,
            Duration::ZERO,
            format!("{} constraints cannot hold without variables", impossible.len()),
        )
    } else if model.variables().is_empty() {
        BackendSolution {
            status: SolveStatus::Optimal,
            values: Some(Vec::new()),
            elapsed: Duration::ZERO,
            message: Some("model has no decision variables".to_string()),
        }
    } else {
        backend.solve(model)
    };

    let values: Vec<Option<f64>> = match (&solution.values, solution.status.has_solution()) {
        (Some(values), true) => model
            .variables()
            .iter()
            .enumerate()
            .map(|(i, def)| {
                values
                    .get(i)
                    .filter(|value| value.is_finite())
                    .map(|value| within_bounds(def, *value))
            })
            .collect(),
        _ => vec![None; model.variables().len()],
    };

    let objective_value = solution.status.has_solution().then(|| {
        model
            .variables()
            .iter()
            .zip(&values)
            .filter_map(|(def, value)| value.map(|value| def.objective * value))
            .sum::<f64>()
    });

    match solution.status {
        SolveStatus::Optimal | SolveStatus::BestEffort => info!(
            model_id = %model_id,
            backend = backend.name(),
            status = solution.status.as_str(),
            objective = objective_value.unwrap_or_default(),
            elapsed_ms = solution.elapsed.as_millis() as u64,
            "solve finished"
        ),
        _ => warn!(
            model_id = %model_id,
            backend = backend.name(),
            status = solution.status.as_str(),
            message = solution.message.as_deref().unwrap_or_default(),
            "solve did not produce a schedule"
        ),
    }

    Solved {
        outcome: SolveOutcome {
            model_id: model_id.clone(),
            scenario: model.scenario.clone(),
            status: solution.status,
            objective_value,
            solve_duration: solution.elapsed,
            backend: backend.name().to_string(),
            message: solution.message,
        },
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dayahead::model::{ConstraintFamily, LinearConstraint, VarKey};
    use chrono::Utc;
    use dispatch_model::Market;

    fn single_variable_model(sense: ObjectiveSense, objective: f64) -> ScheduleModel {
        let mut model = ScheduleModel::new(sense, "p50");
        let var = model.add_variable(VariableDef {
            key: VarKey::Generation {
                plant: 0,
                block: 1,
                market: Market::Dam,
            },
            lower: 0.0,
            upper: Some(10.0),
            objective,
        });
        model.add_constraint(LinearConstraint {
            name: "demand_floor[1]".to_string(),
            family: ConstraintFamily::DemandFloor,
            terms: vec![(var, 1.0)],
            relation: Relation::GreaterEq,
            rhs: 4.0,
        });
        model
    }

    fn minilp() -> Box<dyn LpBackend> {
        backend_for(&SolverConfig::default()).unwrap()
    }

    #[test]
    fn test_minimise_hits_floor() {
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, minilp().as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Optimal);
        assert!((solved.values[0].unwrap() - 4.0).abs() < 1e-6);
        assert!((solved.outcome.objective_value().unwrap() - 12.0).abs() < 1e-6);
        assert_eq!(solved.outcome.backend(), "minilp");
        assert_eq!(solved.outcome.scenario(), "p50");
    }

    #[test]
    fn test_maximise_hits_bound() {
        let model = single_variable_model(ObjectiveSense::MaximizeRevenue, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, minilp().as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Optimal);
        assert!((solved.values[0].unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_model() {
        let mut model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        model.add_constraint(LinearConstraint {
            name: "fixed_demand[A,1]".to_string(),
            family: ConstraintFamily::FixedDemand,
            terms: vec![(VarId(0), 1.0)],
            relation: Relation::LessEq,
            rhs: 2.0,
        });
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, minilp().as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Infeasible);
        assert_eq!(solved.outcome.objective_value(), None);
        assert!(solved.values.iter().all(Option::is_none));
    }

    #[test]
    fn test_constant_row_short_circuits() {
        let mut model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        model.add_constraint(LinearConstraint {
            name: "demand_floor[2]".to_string(),
            family: ConstraintFamily::DemandFloor,
            terms: Vec::new(),
            relation: Relation::GreaterEq,
            rhs: 5.0,
        });
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, minilp().as_ref());
        assert_eq!(solved.outcome.status(), SolveStatus::Infeasible);
        assert_eq!(solved.outcome.solve_duration(), Duration::ZERO);
    }

    #[test]
    fn test_clarabel_backend() {
        let config = SolverConfig {
            backend: SolverBackend::Clarabel,
            ..SolverConfig::default()
        };
        let backend = backend_for(&config).unwrap();
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, backend.as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Optimal);
        assert!((solved.outcome.objective_value().unwrap() - 12.0).abs() < 1e-4);
    }

    #[cfg(feature = "highs")]
    #[test]
    fn test_highs_backend_with_settings() {
        let config = SolverConfig {
            backend: SolverBackend::Highs,
            verbose: true,
            threads: Some(1),
            ..SolverConfig::default()
        };
        let backend = backend_for(&config).unwrap();
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, backend.as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Optimal);
        assert!((solved.outcome.objective_value().unwrap() - 12.0).abs() < 1e-6);
    }

    #[cfg(not(feature = "highs"))]
    #[test]
    fn test_highs_unavailable_without_feature() {
        let config = SolverConfig {
            backend: SolverBackend::Highs,
            ..SolverConfig::default()
        };
        match backend_for(&config) {
            Err(ScheduleError::SolverUnavailable { backend, .. }) => assert_eq!(backend, "highs"),
            Err(other) => panic!("expected SolverUnavailable, got {other:?}"),
            Ok(_) => panic!("expected SolverUnavailable, got a backend"),
        }
    }

    /// Pretends every solve ran into the time limit
    struct SlowBackend;

    impl LpBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn solve(&self, model: &ScheduleModel) -> BackendSolution {
            BackendSolution {
                status: SolveStatus::BestEffort,
                values: Some(vec![5.0; model.variables().len()]),
                elapsed: Duration::from_secs(60),
                message: Some("time limit".to_string()),
            }
        }
    }

    /// Answers every variable with the same value
    struct FixedBackend(f64);

    impl LpBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn solve(&self, model: &ScheduleModel) -> BackendSolution {
            BackendSolution {
                status: SolveStatus::Optimal,
                values: Some(vec![self.0; model.variables().len()]),
                elapsed: Duration::from_millis(1),
                message: None,
            }
        }
    }

    #[test]
    fn test_values_are_pulled_into_bounds() {
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);

        let below = solve_model(&ModelId::generate(Utc::now()), &model, &FixedBackend(-9.4e-9));
        assert_eq!(below.values[0], Some(0.0));
        assert_eq!(below.outcome.objective_value(), Some(0.0));

        let above = solve_model(&ModelId::generate(Utc::now()), &model, &FixedBackend(10.0 + 1e-7));
        assert_eq!(above.values[0], Some(10.0));

        let inside = solve_model(&ModelId::generate(Utc::now()), &model, &FixedBackend(4.5));
        assert_eq!(inside.values[0], Some(4.5));
    }

    #[test]
    fn test_clarabel_proven_optimum_is_not_relabelled() {
        let config = SolverConfig {
            backend: SolverBackend::Clarabel,
            time_limit_secs: 30.0,
            ..SolverConfig::default()
        };
        let backend = backend_for(&config).unwrap();
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, backend.as_ref());

        assert_eq!(solved.outcome.status(), SolveStatus::Optimal);
        assert_eq!(solved.outcome.message(), None);
    }

    #[test]
    fn test_best_effort_keeps_incumbent() {
        let model = single_variable_model(ObjectiveSense::MinimizeCost, 3.0);
        let solved = solve_model(&ModelId::generate(Utc::now()), &model, &SlowBackend);

        assert_eq!(solved.outcome.status(), SolveStatus::BestEffort);
        assert_eq!(solved.outcome.objective_value(), Some(15.0));
        assert_eq!(solved.outcome.solve_time_ms(), 60_000);
    }
}
