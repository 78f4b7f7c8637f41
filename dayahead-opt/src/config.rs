use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// Configuration of one scheduling run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scenario: String,                 // Forecast percentile the run is priced against
    pub operating_date: Option<NaiveDate>, // Used to derive timestamps when only block indices are given
    pub model: ModelConfig,
    pub solver: SolverConfig,
    pub persistence: PersistenceConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scenario: "p50".to_string(),
            operating_date: None,
            model: ModelConfig::default(),
            solver: SolverConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Parameters of the LP formulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub objective: ObjectiveSense,
    pub capacity_headroom: f64,    // Multiplier on available MW giving the per-block cap
    pub demand_floor: f64,         // Fraction of aggregate scheduled MW each block must meet
    pub storage_efficiency: f64,   // One-way charge/discharge efficiency of storage plants
    pub initial_soc_fraction: f64, // Opening state of charge as a fraction of storage capacity
    pub fixed_demand: FixedDemandMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            objective: ObjectiveSense::MinimizeCost,
            // Short-term flexibility over the nominal schedule
            capacity_headroom: 1.2,
            demand_floor: 0.8,
            storage_efficiency: 0.95,
            initial_soc_fraction: 0.5,
            fixed_demand: FixedDemandMode::AtLeast,
        }
    }
}

/// Sign convention of the objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveSense {
    /// Minimise sum(price x quantity)
    MinimizeCost,
    /// Maximise sum((price - marginal cost) x quantity)
    MaximizeRevenue,
}

impl FromStr for ObjectiveSense {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "minimize-cost" | "min-cost" | "cost" => Ok(ObjectiveSense::MinimizeCost),
            "maximize-revenue" | "max-revenue" | "revenue" => Ok(ObjectiveSense::MaximizeRevenue),
            other => Err(format!(
                "unknown objective '{other}', expected minimize-cost or maximize-revenue"
            )),
        }
    }
}

/// How a fixed-demand obligation binds the allocated quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixedDemandMode {
    /// allocated >= contracted
    AtLeast,
    /// allocated == contracted
    Exact,
}

/// Solver backend and its limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: SolverBackend,
    pub time_limit_secs: f64,
    pub verbose: bool,
    pub threads: Option<u32>, // Only honoured by multi-threaded backends
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: SolverBackend::Minilp,
            time_limit_secs: 60.0,
            verbose: false,
            threads: None,
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.time_limit_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    /// Pure Rust simplex, deterministic
    Minilp,
    /// Pure Rust interior point
    Clarabel,
    /// HiGHS, only with the `highs` feature
    Highs,
}

impl SolverBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SolverBackend::Minilp => "minilp",
            SolverBackend::Clarabel => "clarabel",
            SolverBackend::Highs => "highs",
        }
    }
}

impl FromStr for SolverBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minilp" => Ok(SolverBackend::Minilp),
            "clarabel" => Ok(SolverBackend::Clarabel),
            "highs" => Ok(SolverBackend::Highs),
            other => Err(format!(
                "unknown solver '{other}', expected minilp, clarabel or highs"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub retry_backoff_ms: u64, // Wait before the single retry of a failed transaction
    pub busy_timeout_ms: u64,  // SQLite lock wait so concurrent writers serialise
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 250,
            busy_timeout_ms: 5000,
        }
    }
}

impl ScheduleConfig {
    /// Load a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScheduleError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ScheduleConfig = toml::from_str(text)
            .map_err(|e| ScheduleError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if !(model.capacity_headroom.is_finite() && model.capacity_headroom > 0.0) {
            return Err(ScheduleError::config(format!(
                "capacity_headroom must be positive, got {}",
                model.capacity_headroom
            )));
        }
        if !(model.demand_floor.is_finite() && model.demand_floor >= 0.0) {
            return Err(ScheduleError::config(format!(
                "demand_floor must be non-negative, got {}",
                model.demand_floor
            )));
        }
        if !(model.storage_efficiency > 0.0 && model.storage_efficiency <= 1.0) {
            return Err(ScheduleError::config(format!(
                "storage_efficiency must be in (0, 1], got {}",
                model.storage_efficiency
            )));
        }
        if !(0.0..=1.0).contains(&model.initial_soc_fraction) {
            return Err(ScheduleError::config(format!(
                "initial_soc_fraction must be in [0, 1], got {}",
                model.initial_soc_fraction
            )));
        }
        if !(self.solver.time_limit_secs.is_finite() && self.solver.time_limit_secs > 0.0) {
            return Err(ScheduleError::config(format!(
                "time_limit_secs must be positive, got {}",
                self.solver.time_limit_secs
            )));
        }
        Ok(())
    }
}
