use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ScheduleConfig;

/// Identifier of one optimization run.
///
/// Time-stamped to the second with a random suffix, so two runs started in
/// the same second still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("RMO_{}_{}", at.format("%Y%m%d_%H%M%S"), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a run needs besides its input data, created once per run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub model_id: ModelId,
    pub trigger_time: DateTime<Utc>,
    pub data_source_id: String,
    pub config: ScheduleConfig,
}

impl RunContext {
    pub fn new(data_source_id: impl Into<String>, config: ScheduleConfig) -> Self {
        let trigger_time = Utc::now();
        Self {
            model_id: ModelId::generate(trigger_time),
            trigger_time,
            data_source_id: data_source_id.into(),
            config,
        }
    }
}
