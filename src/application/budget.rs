//! Budget gate consulted before billable work

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Billable task categories
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    LlmCallSmall,
    LlmCallMedium,
    SdGeneration,
    ScrapeApiCall,
    Other(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LlmCallSmall => "llm_call_small",
            Self::LlmCallMedium => "llm_call_medium",
            Self::SdGeneration => "sd_generation",
            Self::ScrapeApiCall => "scrape_api_call",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskKind {
    fn from(name: &str) -> Self {
        match name {
            "llm_call_small" => Self::LlmCallSmall,
            "llm_call_medium" => Self::LlmCallMedium,
            "sd_generation" => Self::SdGeneration,
            "scrape_api_call" => Self::ScrapeApiCall,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger write failed on {path:?}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Balance file {path:?} does not hold a number: {content:?}")]
    CorruptBalance { path: PathBuf, content: String },

    #[error("Budget state lock poisoned")]
    LockPoisoned,
}

/// Outcome of charging a task
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Charge {
    Charged { cost: f64, remaining: f64 },
    Refused { remaining: f64 },
}

/// Monetary budget collaborator
pub trait BudgetGate: Send + Sync {
    fn estimate_cost(&self, task: &TaskKind) -> f64;

    fn can_afford(&self, task: &TaskKind) -> bool;

    /// Charge `actual` (the estimate when `None`) if the task is affordable
    fn log_cost(&self, task: &TaskKind, actual: Option<f64>) -> Result<Charge, BudgetError>;
}
