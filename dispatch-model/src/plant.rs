use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::market::Contract;

/// Generation technology of a plant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "./plant.ts")]
pub enum Technology {
    Thermal,
    Solar,
    Wind,
    /// Run-of-river hydro, no storage
    RunOfRiverHydro,
    /// Hydro with a small daily pondage
    PondageHydro,
    PumpedStorage,
    Battery,
}

impl Technology {
    /// Parse the free-text labels found in uploaded market sheets.
    ///
    /// Matching ignores case, spaces, dashes and underscores so that
    /// "Run-of-River Hydro", "run_of_river" and "RoR" all resolve.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "thermal" | "coal" | "gas" | "nuclear" => Some(Technology::Thermal),
            "solar" | "pv" | "solarpv" => Some(Technology::Solar),
            "wind" => Some(Technology::Wind),
            "runofriver" | "runofriverhydro" | "ror" | "hydroror" | "hydro" => {
                Some(Technology::RunOfRiverHydro)
            }
            "pondage" | "pondagehydro" | "hydropondage" => Some(Technology::PondageHydro),
            "pumpedstorage" | "pumpedhydro" | "psp" => Some(Technology::PumpedStorage),
            "battery" | "bess" | "batterystorage" => Some(Technology::Battery),
            _ => None,
        }
    }

    /// Label written to the results table
    pub fn label(&self) -> &'static str {
        match self {
            Technology::Thermal => "Thermal",
            Technology::Solar => "Solar",
            Technology::Wind => "Wind",
            Technology::RunOfRiverHydro => "Run-of-River Hydro",
            Technology::PondageHydro => "Pondage Hydro",
            Technology::PumpedStorage => "Pumped Storage",
            Technology::Battery => "Battery",
        }
    }

    /// Storage technologies get charge and state-of-charge variables
    pub fn is_storage(&self) -> bool {
        matches!(self, Technology::PumpedStorage | Technology::Battery)
    }

    /// Availability follows weather or inflow and varies per time block
    pub fn is_variable(&self) -> bool {
        matches!(
            self,
            Technology::Solar
                | Technology::Wind
                | Technology::RunOfRiverHydro
                | Technology::PondageHydro
        )
    }
}

/// A generating unit taking part in one scheduling run.
///
/// Plants are immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, TS)]
#[ts(export, export_to = "./plant.ts")]
pub struct Plant {
    /// Plant name as found in the input table.
    pub name: String,
    pub technology: Technology,
    pub region: String,
    pub state: String,
    /// The contract governing where the output may be sold.
    pub contract: Contract,
}

impl Plant {
    pub fn new(name: impl Into<String>, technology: Technology, contract: Contract) -> Self {
        Self {
            name: name.into(),
            technology,
            region: String::new(),
            state: String::new(),
            contract,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technology_labels() {
        assert_eq!(Technology::from_label("Thermal"), Some(Technology::Thermal));
        assert_eq!(Technology::from_label(" solar "), Some(Technology::Solar));
        assert_eq!(
            Technology::from_label("Run-of-River Hydro"),
            Some(Technology::RunOfRiverHydro)
        );
        assert_eq!(
            Technology::from_label("Pumped_Storage"),
            Some(Technology::PumpedStorage)
        );
        assert_eq!(Technology::from_label("BESS"), Some(Technology::Battery));
        assert_eq!(Technology::from_label("geothermal"), None);
    }

    #[test]
    fn test_storage_and_variable_flags() {
        assert!(Technology::Battery.is_storage());
        assert!(Technology::PumpedStorage.is_storage());
        assert!(!Technology::PondageHydro.is_storage());

        assert!(Technology::Solar.is_variable());
        assert!(!Technology::Thermal.is_variable());
        assert!(!Technology::Battery.is_variable());
    }
}
