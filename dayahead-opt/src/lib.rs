pub mod config;
pub mod data;
pub mod dayahead;
pub mod error;
pub mod runner;
pub mod store;

// Re-export commonly used items for convenience
pub use config::ScheduleConfig;
pub use error::{Result, ScheduleError};
pub use runner::{RunReport, RunRequest, run, run_sweep};
