//! Application layer module
//!
//! Orchestration of the domain rules over the infrastructure adapters:
//! the harvest pipeline and the budget gate it consults.

pub mod budget;
pub mod pipeline;

pub use budget::{BudgetError, BudgetGate, Charge, TaskKind};
pub use pipeline::{HarvestPipeline, HarvestReport, SourceOutcome, SourceStatus};
