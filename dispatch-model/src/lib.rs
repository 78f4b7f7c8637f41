pub mod market;
pub mod plant;
pub mod schedule;

pub use market::{Contract, ContractType, Market};
pub use plant::{Plant, Technology};
pub use schedule::{ScheduleResult, SolveStatus, TimeBlock, BLOCKS_PER_DAY, MINUTES_PER_BLOCK};
