//! Harvest pipeline orchestrator
//!
//! Sources are processed strictly in configured order. Per source:
//! fetch -> parse -> filter -> dedup -> accept -> normalize -> persist, until
//! the source's limit is reached or its candidates run out. No failure of a
//! single source, candidate or row ends the run.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::budget::{BudgetGate, Charge, TaskKind};
use crate::domain::{
    ContentFilter, DedupIndex, EventBus, PipelineEvent, RawCandidate, Record, RejectReason, RunClock,
    SkipReason, SourceConfig, normalize,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::csv_store::RecordStore;
use crate::infrastructure::fetch_error::{BlockKind, FetchError};
use crate::infrastructure::fetcher::Fetcher;
use crate::infrastructure::parsing::DocumentParser;

/// How a source's turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    SkippedInvalid,
    SkippedBudget,
    Captcha,
    FetchFailed,
    /// Stored identifiers could not be read, so duplicates could not be ruled out
    StoreUnavailable,
    Cancelled,
}

/// Per-source summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub captured: usize,
    pub spam_rejected: usize,
    pub duplicate_rejected: usize,
    pub parse_errors: usize,
    pub persist_errors: usize,
}

impl SourceOutcome {
    fn new(source: &SourceConfig, status: SourceStatus) -> Self {
        Self {
            source: source.key(),
            status,
            captured: 0,
            spam_rejected: 0,
            duplicate_rejected: 0,
            parse_errors: 0,
            persist_errors: 0,
        }
    }
}

/// Result of one run: the new records plus what happened to every source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestReport {
    pub run_id: String,
    pub records: Vec<Record>,
    pub outcomes: Vec<SourceOutcome>,
}

impl HarvestReport {
    pub fn captured(&self) -> usize {
        self.records.len()
    }

    pub fn outcome(&self, source_key: &str) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|o| o.source == source_key)
    }
}

pub struct HarvestPipeline {
    fetcher: Arc<dyn Fetcher>,
    parser: DocumentParser,
    store: Arc<dyn RecordStore>,
    budget: Option<Arc<dyn BudgetGate>>,
    blocklist: Vec<String>,
    events: EventBus,
}

impl HarvestPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: DocumentParser,
        store: Arc<dyn RecordStore>,
        events: EventBus,
    ) -> Self {
        Self {
            fetcher,
            parser,
            store,
            budget: None,
            blocklist: Vec::new(),
            events,
        }
    }

    /// Pipeline wired from configuration (parser selectors, pacing, block-list)
    pub fn from_config(
        config: &AppConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn RecordStore>,
        events: EventBus,
    ) -> anyhow::Result<Self> {
        let parser = DocumentParser::new(
            &config.parsing,
            config.pacing.clone(),
            config.pipeline.overscan_factor,
        )?;
        Ok(Self::new(fetcher, parser, store, events).with_blocklist(config.filter.blocklist.clone()))
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Arc<dyn BudgetGate>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Global block-list, used by sources without their own
    #[must_use]
    pub fn with_blocklist(mut self, terms: Vec<String>) -> Self {
        self.blocklist = terms;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Harvest every source in order. Cancellation is honoured between sources.
    pub async fn run(&self, sources: &[SourceConfig], cancel: &CancellationToken) -> HarvestReport {
        let run_id = Uuid::new_v4().to_string();
        self.events.publish(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            sources: sources.len(),
        });

        let mut indexes = self.load_indexes(sources);
        let mut clock = RunClock::new();
        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(sources.len());

        for source in sources {
            let key = source.key();

            if cancel.is_cancelled() {
                self.skip(source, SkipReason::Cancelled);
                outcomes.push(SourceOutcome::new(source, SourceStatus::Cancelled));
                continue;
            }

            if !source.has_valid_name() {
                self.skip(source, SkipReason::InvalidName);
                outcomes.push(SourceOutcome::new(source, SourceStatus::SkippedInvalid));
                continue;
            }

            let index = match indexes.remove(&key) {
                Some(Ok(index)) => index,
                Some(Err(message)) => {
                    self.skip(source, SkipReason::StoreUnavailable { message });
                    outcomes.push(SourceOutcome::new(source, SourceStatus::StoreUnavailable));
                    continue;
                }
                None => {
                    self.skip(source, SkipReason::StoreUnavailable {
                        message: "source is configured more than once".to_string(),
                    });
                    outcomes.push(SourceOutcome::new(source, SourceStatus::StoreUnavailable));
                    continue;
                }
            };

            let outcome = self.harvest_source(source, index, &mut clock, &mut records).await;
            outcomes.push(outcome);
        }

        self.events.publish(PipelineEvent::RunCompleted {
            run_id: run_id.clone(),
            captured: records.len(),
        });

        HarvestReport {
            run_id,
            records,
            outcomes,
        }
    }

    /// Snapshot stored identifiers for every valid source before any fetching
    fn load_indexes(&self, sources: &[SourceConfig]) -> HashMap<String, Result<DedupIndex, String>> {
        sources
            .iter()
            .filter(|source| source.has_valid_name())
            .map(|source| {
                let key = source.key();
                let index = self
                    .store
                    .load_identifiers(source)
                    .map(|ids| DedupIndex::from_persisted(key.clone(), ids))
                    .map_err(|e| {
                        warn!("💾 Could not load stored identifiers for {}: {}", key, e);
                        e.to_string()
                    });
                (key, index)
            })
            .collect()
    }

    async fn harvest_source(
        &self,
        source: &SourceConfig,
        mut index: DedupIndex,
        clock: &mut RunClock,
        records: &mut Vec<Record>,
    ) -> SourceOutcome {
        let key = source.key();
        let task = TaskKind::ScrapeApiCall;

        if let Some(budget) = &self.budget {
            if !budget.can_afford(&task) {
                self.skip(source, SkipReason::BudgetExhausted);
                return SourceOutcome::new(source, SourceStatus::SkippedBudget);
            }
        }

        self.events.publish(PipelineEvent::SourceStarted {
            source: key.clone(),
            url: source.target_url(),
        });

        let document = match self.fetcher.fetch(source).await {
            Ok(document) => document,
            Err(FetchError::Blocked {
                kind: BlockKind::Captcha,
                ..
            }) => {
                self.skip(source, SkipReason::Captcha);
                return SourceOutcome::new(source, SourceStatus::Captcha);
            }
            Err(e) => {
                self.skip(source, SkipReason::FetchFailed { message: e.to_string() });
                return SourceOutcome::new(source, SourceStatus::FetchFailed);
            }
        };

        let filter = match &source.blocklist {
            Some(terms) => ContentFilter::new(terms),
            None => ContentFilter::new(&self.blocklist),
        };

        let mut outcome = SourceOutcome::new(source, SourceStatus::Completed);
        let mut candidates = self.parser.parse(document, source);
        let mut position = 0;

        while outcome.captured < source.limit {
            let Some(next) = candidates.next().await else {
                break;
            };
            let item = position;
            position += 1;

            let raw = match next {
                Ok(raw) => raw,
                Err(e) => {
                    outcome.parse_errors += 1;
                    self.events.publish(PipelineEvent::CandidateParseFailed {
                        source: key.clone(),
                        index: item,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(term) = filter.matched_term(&raw.title) {
                outcome.spam_rejected += 1;
                self.reject(&key, raw.identifier, RejectReason::Spam { term: term.to_string() });
                continue;
            }

            if index.contains(&raw.identifier) {
                outcome.duplicate_rejected += 1;
                self.reject(&key, raw.identifier, RejectReason::Duplicate);
                continue;
            }

            // Claimed before persisting: a failed write still blocks a second
            // attempt at the same identifier within this run
            index.accept(raw.identifier.clone());
            let record = build_record(source, raw, clock);

            match self.store.append(&record) {
                Ok(()) => {
                    outcome.captured += 1;
                    self.events.publish(PipelineEvent::RecordCaptured {
                        source: key.clone(),
                        identifier: record.identifier.clone(),
                    });
                    records.push(record);
                }
                Err(e) => {
                    outcome.persist_errors += 1;
                    self.events.publish(PipelineEvent::PersistenceFailed {
                        source: key.clone(),
                        identifier: record.identifier,
                        error: e.to_string(),
                    });
                }
            }
        }

        candidates.finish().await;
        self.charge(&task, &key);

        if outcome.captured < source.limit {
            info!("📭 {} ran out of candidates ({} of {} captured)", key, outcome.captured, source.limit);
        }
        self.events.publish(PipelineEvent::SourceCompleted {
            source: key,
            captured: outcome.captured,
        });
        outcome
    }

    fn charge(&self, task: &TaskKind, key: &str) {
        let Some(budget) = &self.budget else {
            return;
        };
        match budget.log_cost(task, None) {
            Ok(Charge::Charged { cost, remaining }) => {
                info!("💰 Charged £{:.3} for {} (£{:.2} left)", cost, key, remaining);
            }
            Ok(Charge::Refused { remaining }) => {
                warn!("💰 Charge for {} refused (£{:.2} left)", key, remaining);
            }
            Err(e) => warn!("💰 Failed to record cost for {}: {}", key, e),
        }
    }

    fn skip(&self, source: &SourceConfig, reason: SkipReason) {
        self.events.publish(PipelineEvent::SourceSkipped {
            source: source.key(),
            reason,
        });
    }

    fn reject(&self, key: &str, identifier: String, reason: RejectReason) {
        self.events.publish(PipelineEvent::CandidateRejected {
            source: key.to_string(),
            identifier,
            reason,
        });
    }
}

fn build_record(source: &SourceConfig, raw: RawCandidate, clock: &mut RunClock) -> Record {
    let engagement = source
        .kind
        .metrics()
        .iter()
        .map(|metric| {
            let value = raw.raw_engagement.get(metric).map_or(0, |text| normalize(text));
            (*metric, value)
        })
        .collect();

    Record {
        source_name: source.name.clone(),
        source_kind: source.kind,
        identifier: raw.identifier,
        title: raw.title,
        engagement,
        captured_at: clock.now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metric, SourceKind};
    use crate::infrastructure::config::PacingConfig;
    use crate::infrastructure::parsing::ParsingConfig;
    use crate::test_utils::{
        FailingStore, MemoryBudget, MemoryStore, ScriptedBrowser, ScriptedVideo, StaticFetcher, listing_html,
    };

    fn parser() -> DocumentParser {
        DocumentParser::new(&ParsingConfig::default(), PacingConfig::immediate(), 2).unwrap()
    }

    fn pipeline(fetcher: StaticFetcher, store: Arc<dyn RecordStore>) -> HarvestPipeline {
        HarvestPipeline::new(Arc::new(fetcher), parser(), store, EventBus::default())
            .with_blocklist(vec!["crypto".into(), "sponsored".into()])
    }

    fn nosleep(limit: usize) -> SourceConfig {
        SourceConfig::new("nosleep", SourceKind::Listing, limit)
    }

    #[tokio::test]
    async fn test_filter_dedup_and_limit() {
        let html = listing_html(&[
            ("Kept one", "/r/nosleep/comments/1/", "1.2k", "10 comments"),
            ("CRYPTO giveaway", "/r/nosleep/comments/2/", "5", "0 comments"),
            ("Already stored", "/r/nosleep/comments/3/", "5", "0 comments"),
            ("Kept two", "/r/nosleep/comments/4/", "7", "1,234 comments"),
            ("Kept one again", "/r/nosleep/comments/1/", "7", "2 comments"),
        ]);
        let store = Arc::new(MemoryStore::with_identifiers(
            &nosleep(5),
            ["https://old.reddit.com/r/nosleep/comments/3/"],
        ));
        let fetcher = StaticFetcher::new().with_listing(&nosleep(5), html);

        let report = pipeline(fetcher, store.clone()).run(&[nosleep(5)], &CancellationToken::new()).await;

        assert_eq!(report.captured(), 2);
        let outcome = report.outcome("listing:nosleep").unwrap();
        assert_eq!(outcome.status, SourceStatus::Completed);
        assert_eq!(outcome.spam_rejected, 1);
        assert_eq!(outcome.duplicate_rejected, 2);

        let first = &report.records[0];
        assert_eq!(first.metric(Metric::Upvotes), 1200);
        assert_eq!(first.metric(Metric::Comments), 10);
        assert_eq!(report.records[1].metric(Metric::Comments), 1234);
        assert!(report.records[0].captured_at <= report.records[1].captured_at);
        assert_eq!(store.appended().len(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_limit() {
        let html = listing_html(&[
            ("a", "/r/nosleep/comments/1/", "1", "0 comments"),
            ("b", "/r/nosleep/comments/2/", "1", "0 comments"),
            ("c", "/r/nosleep/comments/3/", "1", "0 comments"),
        ]);
        let fetcher = StaticFetcher::new().with_listing(&nosleep(2), html);
        let report = pipeline(fetcher, Arc::new(MemoryStore::new()))
            .run(&[nosleep(2)], &CancellationToken::new())
            .await;
        assert_eq!(report.captured(), 2);
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_and_run_continues() {
        let html = listing_html(&[
            ("a", "/r/nosleep/comments/1/", "1", "0 comments"),
            ("a again", "/r/nosleep/comments/1/", "1", "0 comments"),
        ]);
        let fetcher = StaticFetcher::new().with_listing(&nosleep(5), html);
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let report = HarvestPipeline::new(Arc::new(fetcher), parser(), Arc::new(FailingStore), events)
            .run(&[nosleep(5)], &CancellationToken::new())
            .await;

        let outcome = report.outcome("listing:nosleep").unwrap();
        assert_eq!(outcome.persist_errors, 1);
        // The failed identifier stays claimed for the rest of the run
        assert_eq!(outcome.duplicate_rejected, 1);
        assert_eq!(report.captured(), 0);

        let mut failures = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PipelineEvent::PersistenceFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_invalid_name_and_budget_skips() {
        let html = listing_html(&[("a", "/r/nosleep/comments/1/", "1", "0 comments")]);
        let bad = SourceConfig::new("no sleep", SourceKind::Listing, 1);
        let fetcher = StaticFetcher::new().with_listing(&nosleep(1), html);
        let budget = Arc::new(MemoryBudget::new(0.0));

        let report = pipeline(fetcher, Arc::new(MemoryStore::new()))
            .with_budget(budget.clone())
            .run(&[bad, nosleep(1)], &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes[0].status, SourceStatus::SkippedInvalid);
        assert_eq!(report.outcomes[1].status, SourceStatus::SkippedBudget);
        assert!(budget.charges().is_empty());
    }

    #[tokio::test]
    async fn test_budget_charged_per_fetched_source() {
        let html = listing_html(&[("a", "/r/nosleep/comments/1/", "1", "0 comments")]);
        let fetcher = StaticFetcher::new().with_listing(&nosleep(1), html);
        let budget = Arc::new(MemoryBudget::new(1.0));

        pipeline(fetcher, Arc::new(MemoryStore::new()))
            .with_budget(budget.clone())
            .run(&[nosleep(1)], &CancellationToken::new())
            .await;

        assert_eq!(budget.charges(), vec![TaskKind::ScrapeApiCall]);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_sources() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = pipeline(StaticFetcher::new(), Arc::new(MemoryStore::new()))
            .run(&[nosleep(1)], &cancel)
            .await;
        assert_eq!(report.outcomes[0].status, SourceStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_per_source_blocklist_replaces_global() {
        let html = listing_html(&[
            ("crypto talk", "/r/nosleep/comments/1/", "1", "0 comments"),
            ("Giveaway inside", "/r/nosleep/comments/2/", "1", "0 comments"),
        ]);
        let source = nosleep(5).with_blocklist(["giveaway"]);
        let fetcher = StaticFetcher::new().with_listing(&source, html);
        let report = pipeline(fetcher, Arc::new(MemoryStore::new()))
            .run(&[source], &CancellationToken::new())
            .await;

        assert_eq!(report.captured(), 1);
        assert_eq!(report.records[0].title, "crypto talk");
    }

    #[tokio::test]
    async fn test_unreadable_store_skips_source_and_run_continues() {
        let askreddit = SourceConfig::new("AskReddit", SourceKind::Listing, 1);
        let html = listing_html(&[("a", "/r/nosleep/comments/1/", "1", "0 comments")]);
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with_listing(&askreddit, html.clone())
                .with_listing(&nosleep(1), html),
        );
        let store = Arc::new(MemoryStore::new().with_unreadable(&askreddit));
        let events = EventBus::new(64);
        let mut rx = events.subscribe();

        let report = HarvestPipeline::new(fetcher.clone(), parser(), store, events)
            .run(&[askreddit, nosleep(1)], &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes[0].status, SourceStatus::StoreUnavailable);
        assert_eq!(report.outcomes[1].status, SourceStatus::Completed);
        assert_eq!(report.outcomes[1].captured, 1);
        // The unreadable source is never fetched
        assert_eq!(fetcher.fetched(), vec!["listing:nosleep".to_string()]);

        let mut skipped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::SourceSkipped { source, reason } = event {
                skipped.push((source, reason));
            }
        }
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, "listing:AskReddit");
        assert!(matches!(skipped[0].1, SkipReason::StoreUnavailable { ref message } if message.contains("URL")));
    }

    #[tokio::test]
    async fn test_captcha_and_terminal_errors_map_to_statuses() {
        let askreddit = SourceConfig::new("AskReddit", SourceKind::Listing, 1);
        let fetcher = StaticFetcher::new()
            .with_error(&askreddit, FetchError::blocked(BlockKind::Captcha, "https://old.reddit.com/r/AskReddit"))
            .with_error(&nosleep(1), FetchError::terminal("https://old.reddit.com/r/nosleep", "HTTP 403"));

        let report = pipeline(fetcher, Arc::new(MemoryStore::new()))
            .run(&[askreddit, nosleep(1)], &CancellationToken::new())
            .await;

        assert_eq!(report.outcomes[0].status, SourceStatus::Captcha);
        assert_eq!(report.outcomes[1].status, SourceStatus::FetchFailed);
    }

    #[tokio::test]
    async fn test_feed_session_is_closed_after_harvest() {
        let source = SourceConfig::new("scalingstories", SourceKind::VideoFeed, 1);
        let browser = ScriptedBrowser::new()
            .with_video(ScriptedVideo::new("https://www.tiktok.com/@s/video/1", "First", "1k", "2", "3"))
            .with_video(ScriptedVideo::new("https://www.tiktok.com/@s/video/2", "Second", "1", "1", "1"));
        let handle = browser.handle();
        let fetcher = StaticFetcher::new().with_feed(&source, browser);

        let report = pipeline(fetcher, Arc::new(MemoryStore::new()))
            .run(&[source], &CancellationToken::new())
            .await;

        assert_eq!(report.captured(), 1);
        assert_eq!(report.records[0].metric(Metric::Likes), 1000);
        assert!(handle.closed());
    }
}
