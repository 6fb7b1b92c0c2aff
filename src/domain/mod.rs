pub mod opportunity;
pub mod result;

pub use opportunity::{BackrunDirection, BackrunTarget, Opportunity, OpportunityType, PathHop};
pub use result::{ExecutionResult, GasBaselineEntry, ProviderHealth};
