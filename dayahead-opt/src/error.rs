use thiserror::Error;

/// Failure categories of a scheduling run.
///
/// Every variant reaches the invocation as a structured failure payload.
/// Only `Persistence` is retried (once, by the writer).
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Missing or invalid input location or schema
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("scenario '{requested}' not found (available: {})", available.join(", "))]
    ScenarioNotFound {
        requested: String,
        available: Vec<String>,
    },

    /// No plants or no time blocks, nothing to optimize
    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("solver backend '{backend}' unavailable: {reason}")]
    SolverUnavailable { backend: String, reason: String },

    /// The solver proved that no feasible schedule exists
    #[error("infeasible model: {}", diagnosis.join("; "))]
    InfeasibleModel { diagnosis: Vec<String> },

    /// Unbounded or internal solver failure
    #[error("solver failed with status {status}: {message}")]
    SolverFailure { status: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl ScheduleError {
    /// Stable machine-readable name of the category
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::Configuration(_) => "ConfigurationError",
            ScheduleError::ScenarioNotFound { .. } => "ScenarioNotFoundError",
            ScheduleError::EmptyInput(_) => "EmptyInputError",
            ScheduleError::SolverUnavailable { .. } => "SolverUnavailableError",
            ScheduleError::InfeasibleModel { .. } => "InfeasibleModelError",
            ScheduleError::SolverFailure { .. } => "SolverFailureError",
            ScheduleError::Persistence(_) => "PersistenceError",
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ScheduleError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
