//! Pipeline events
//!
//! Every skip, abort, suspension and capture decision is published here so an
//! outer layer can render progress. Events are also mirrored to `tracing`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why a whole source was not (fully) processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidName,
    BudgetExhausted,
    Captcha,
    FetchFailed { message: String },
    StoreUnavailable { message: String },
    Cancelled,
}

/// Why a single candidate was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Spam { term: String },
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        sources: usize,
    },
    SourceStarted {
        source: String,
        url: String,
    },
    FetchAttempt {
        source: String,
        attempt: u32,
        max_attempts: u32,
    },
    FetchRetryScheduled {
        source: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// A login wall is in front of the content; processing is suspended
    /// until someone resolves it and sends the resume signal.
    ResolutionNeeded {
        source: String,
        url: String,
    },
    Resumed {
        source: String,
    },
    SourceSkipped {
        source: String,
        reason: SkipReason,
    },
    CandidateRejected {
        source: String,
        identifier: String,
        reason: RejectReason,
    },
    CandidateParseFailed {
        source: String,
        index: usize,
        error: String,
    },
    RecordCaptured {
        source: String,
        identifier: String,
    },
    PersistenceFailed {
        source: String,
        identifier: String,
        error: String,
    },
    SourceCompleted {
        source: String,
        captured: usize,
    },
    RunCompleted {
        run_id: String,
        captured: usize,
    },
}

/// Broadcast hub for [`PipelineEvent`]s. Publishing never blocks and works
/// with zero subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        trace_event(&event);
        // No receivers is fine
        let _ = self.sender.send(event);
    }
}

fn trace_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::RunStarted { run_id, sources } => {
            info!("🚀 Harvest run {} started ({} sources)", run_id, sources);
        }
        PipelineEvent::SourceStarted { source, url } => info!("🔍 Harvesting {} from {}", source, url),
        PipelineEvent::FetchAttempt { source, attempt, max_attempts } => {
            debug!("🌐 Fetch attempt {}/{} for {}", attempt, max_attempts, source);
        }
        PipelineEvent::FetchRetryScheduled { source, attempt, delay_ms, error } => {
            warn!("🔄 {} attempt {} failed ({}), retrying in {}ms", source, attempt, error, delay_ms);
        }
        PipelineEvent::ResolutionNeeded { source, url } => {
            warn!("🔐 Login wall on {} ({}); waiting for manual resolution", source, url);
        }
        PipelineEvent::Resumed { source } => info!("▶️ Resumed {}", source),
        PipelineEvent::SourceSkipped { source, reason } => warn!("⏭️ Skipping {}: {:?}", source, reason),
        PipelineEvent::CandidateRejected { source, identifier, reason } => {
            debug!("🚫 {} rejected {} ({:?})", source, identifier, reason);
        }
        PipelineEvent::CandidateParseFailed { source, index, error } => {
            warn!("❌ {} item {} could not be parsed: {}", source, index, error);
        }
        PipelineEvent::RecordCaptured { source, identifier } => debug!("✅ {} captured {}", source, identifier),
        PipelineEvent::PersistenceFailed { source, identifier, error } => {
            warn!("💾 {} failed to persist {}: {}", source, identifier, error);
        }
        PipelineEvent::SourceCompleted { source, captured } => info!("📦 {} done: {} new records", source, captured),
        PipelineEvent::RunCompleted { run_id, captured } => {
            info!("🏁 Harvest run {} finished: {} new records", run_id, captured);
        }
    }
}
