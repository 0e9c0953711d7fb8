//! Domain module - records, sources and the pure ingestion rules
//!
//! Everything in here is free of I/O: the record model, the number
//! normalizer, the spam filter, the dedup index and the pipeline events.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod content_filter;
pub mod dedup_index;
pub mod events;
pub mod normalizer;
pub mod record;

// Re-export commonly used items for convenience
pub use content_filter::ContentFilter;
pub use dedup_index::DedupIndex;
pub use events::{EventBus, PipelineEvent, RejectReason, SkipReason};
pub use normalizer::normalize;
pub use record::{Metric, RawCandidate, Record, RunClock, SourceConfig, SourceKind};
