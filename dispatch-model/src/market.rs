use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

/// Wholesale clearing venues a plant can sell into
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema, TS,
)]
#[ts(export, export_to = "./market.ts")]
pub enum Market {
    /// Day-Ahead Market
    #[serde(rename = "DAM")]
    Dam,
    /// Green Day-Ahead Market
    #[serde(rename = "GDAM")]
    Gdam,
    /// Real-Time Market
    #[serde(rename = "RTM")]
    Rtm,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::Dam, Market::Gdam, Market::Rtm];

    pub fn code(&self) -> &'static str {
        match self {
            Market::Dam => "DAM",
            Market::Gdam => "GDAM",
            Market::Rtm => "RTM",
        }
    }

    /// Lower-case prefix used by the input columns (`damprice`, `dam_p50`, ...)
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Market::Dam => "dam",
            Market::Gdam => "gdam",
            Market::Rtm => "rtm",
        }
    }
}

/// Contract structures governing where a plant's output may be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "./market.ts")]
pub enum ContractType {
    /// Long-term power purchase agreement settled against the day-ahead price
    Ppa,
    /// Fixed-demand / tolling agreement with a per-block delivery obligation
    FixedDemand,
    /// Firm and dispatchable renewable energy
    Fdre,
    /// Round-the-clock renewable energy
    ReRtc,
    PeakDemand,
    GreenAmmonia,
    /// Uncontracted capacity, free to sell into every market
    #[default]
    Merchant,
}

impl ContractType {
    /// Parse the contract labels used in the uploaded sheets.
    ///
    /// Blank labels are merchant capacity; unknown labels return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "" | "merchant" | "none" => Some(ContractType::Merchant),
            "ppa" => Some(ContractType::Ppa),
            "fixeddemand" | "tolling" | "fixed" => Some(ContractType::FixedDemand),
            "fdre" => Some(ContractType::Fdre),
            "rertc" | "rtc" => Some(ContractType::ReRtc),
            "peakdemand" | "peak" => Some(ContractType::PeakDemand),
            "greenammonia" => Some(ContractType::GreenAmmonia),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContractType::Ppa => "PPA",
            ContractType::FixedDemand => "Fixed Demand",
            ContractType::Fdre => "FDRE",
            ContractType::ReRtc => "RE-RTC",
            ContractType::PeakDemand => "Peak Demand",
            ContractType::GreenAmmonia => "Green Ammonia",
            ContractType::Merchant => "Merchant",
        }
    }

    /// Markets this contract permits deliveries into
    pub fn eligible_markets(&self) -> &'static [Market] {
        match self {
            ContractType::Merchant => &[Market::Dam, Market::Gdam, Market::Rtm],
            ContractType::Ppa | ContractType::FixedDemand => &[Market::Dam],
            ContractType::Fdre | ContractType::ReRtc => &[Market::Dam, Market::Gdam],
            ContractType::PeakDemand => &[Market::Dam, Market::Rtm],
            ContractType::GreenAmmonia => &[Market::Gdam],
        }
    }

    pub fn permits(&self, market: Market) -> bool {
        self.eligible_markets().contains(&market)
    }

    /// Contracts that pin the allocated quantity to a contracted value every block
    pub fn has_fixed_demand(&self) -> bool {
        matches!(self, ContractType::FixedDemand)
    }
}

/// The contract a plant is scheduled under
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, TS)]
#[ts(export, export_to = "./market.ts")]
pub struct Contract {
    pub contract_type: ContractType,
    /// Reference name of the contract, empty for merchant capacity.
    pub name: String,
}

impl Contract {
    pub fn new(contract_type: ContractType, name: impl Into<String>) -> Self {
        Self {
            contract_type,
            name: name.into(),
        }
    }

    pub fn merchant() -> Self {
        Self::default()
    }
}
