//! Feed Harvester - social listing ingestion pipeline
//!
//! Fetches subreddit listings and short-video feeds, drops spam and
//! already-seen posts, normalizes engagement counts and appends new records
//! to one CSV store per source.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the types most callers need
pub use application::{HarvestPipeline, HarvestReport, SourceOutcome, SourceStatus};
pub use domain::{EventBus, PipelineEvent, Record, SourceConfig, SourceKind};
pub use infrastructure::AppConfig;
