//! End-to-end harvest scenarios over listing sources: scripted HTTP in,
//! real CSV files out.

use std::fs;
use std::sync::Arc;

use rstest::rstest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use feed_harvester::application::{HarvestPipeline, HarvestReport, SourceStatus};
use feed_harvester::domain::{EventBus, Metric, PipelineEvent, SourceConfig, SourceKind};
use feed_harvester::infrastructure::config::{AppConfig, PacingConfig};
use feed_harvester::infrastructure::csv_store::{CsvRecordStore, RecordStore};
use feed_harvester::infrastructure::http_client::{HttpFetcher, TransportError};
use feed_harvester::infrastructure::SourceFetcher;
use feed_harvester::test_utils::{ScriptedTransport, listing_html};

struct Harness {
    dir: TempDir,
    config: AppConfig,
}

impl Harness {
    fn new() -> Self {
        let mut config = AppConfig::default();
        config.pacing = PacingConfig::immediate();
        Self {
            dir: tempfile::tempdir().unwrap(),
            config,
        }
    }

    fn store(&self) -> Arc<CsvRecordStore> {
        Arc::new(CsvRecordStore::open(self.dir.path()).unwrap())
    }

    async fn run(
        &self,
        transport: Arc<ScriptedTransport>,
        sources: &[SourceConfig],
        events: EventBus,
    ) -> HarvestReport {
        let http = HttpFetcher::new(transport, &self.config.http, self.config.pacing.clone(), events.clone()).unwrap();
        let fetcher = Arc::new(SourceFetcher::new(http, None));
        HarvestPipeline::from_config(&self.config, fetcher, self.store(), events)
            .unwrap()
            .run(sources, &CancellationToken::new())
            .await
    }

    fn lines(&self, file: &str) -> Vec<String> {
        fs::read_to_string(self.dir.path().join(file))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn nosleep(limit: usize) -> SourceConfig {
    SourceConfig::new("nosleep", SourceKind::Listing, limit)
}

fn five_items() -> String {
    listing_html(&[
        ("The thing in the attic", "/r/nosleep/comments/a1/attic/", "2.4k", "310 comments"),
        ("Sponsored: best horror app", "/r/nosleep/comments/a2/app/", "3", "0 comments"),
        ("My neighbour never sleeps", "/r/nosleep/comments/a3/neighbour/", "812", "45 comments"),
        ("Night shift at the morgue", "/r/nosleep/comments/a4/morgue/", "1,024", "88 comments"),
        ("The lake at 3am", "/r/nosleep/comments/a5/lake/", "•", "comment"),
    ])
}

fn ok(body: String) -> Result<String, TransportError> {
    Ok(body)
}

#[tokio::test]
async fn five_items_two_stored_one_spam_appends_two_rows() {
    let harness = Harness::new();
    let seed = harness.store();

    // Seed the store with two of the five posts
    let transport = Arc::new(ScriptedTransport::new(vec![ok(listing_html(&[
        ("My neighbour never sleeps", "/r/nosleep/comments/a3/neighbour/", "800", "40 comments"),
        ("Night shift at the morgue", "/r/nosleep/comments/a4/morgue/", "1,000", "80 comments"),
    ]))]));
    let first = harness.run(transport, &[nosleep(10)], EventBus::default()).await;
    assert_eq!(first.captured(), 2);
    assert_eq!(seed.load_identifiers(&nosleep(10)).unwrap().len(), 2);

    let transport = Arc::new(ScriptedTransport::new(vec![ok(five_items())]));
    let report = harness.run(transport, &[nosleep(10)], EventBus::default()).await;

    assert_eq!(report.captured(), 2);
    let outcome = report.outcome("listing:nosleep").unwrap();
    assert_eq!(outcome.spam_rejected, 1);
    assert_eq!(outcome.duplicate_rejected, 2);

    let lines = harness.lines("listing_nosleep.csv");
    assert_eq!(lines.len(), 1 + 2 + 2);
    assert_eq!(lines[0], "Date,SourceName,Title,Upvotes,Comments,URL");
    assert!(lines[3].ends_with(",The thing in the attic,2400,310,https://old.reddit.com/r/nosleep/comments/a1/attic/"));
    assert!(lines[4].ends_with(",The lake at 3am,0,0,https://old.reddit.com/r/nosleep/comments/a5/lake/"));
}

#[tokio::test]
async fn rerun_against_unchanged_listing_yields_nothing_new() {
    let harness = Harness::new();

    let transport = Arc::new(ScriptedTransport::new(vec![ok(five_items())]));
    let first = harness.run(transport, &[nosleep(10)], EventBus::default()).await;
    assert_eq!(first.captured(), 4);

    let transport = Arc::new(ScriptedTransport::new(vec![ok(five_items())]));
    let second = harness.run(transport, &[nosleep(10)], EventBus::default()).await;
    assert_eq!(second.captured(), 0);
    assert_eq!(second.outcome("listing:nosleep").unwrap().duplicate_rejected, 4);
    assert_eq!(harness.lines("listing_nosleep.csv").len(), 5);
}

#[tokio::test]
async fn fewer_items_than_limit_finishes_with_that_count() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(vec![ok(five_items())]));
    let report = harness.run(transport, &[nosleep(25)], EventBus::default()).await;

    let outcome = report.outcome("listing:nosleep").unwrap();
    assert_eq!(outcome.status, SourceStatus::Completed);
    assert_eq!(outcome.captured, 4);
}

#[tokio::test]
async fn transient_failures_are_retried_then_pipeline_proceeds() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(TransportError::Connect("tls handshake eof".into())),
        Err(TransportError::Connect("connection refused".into())),
        ok(five_items()),
    ]));
    let events = EventBus::new(256);
    let mut rx = events.subscribe();

    let report = harness.run(transport.clone(), &[nosleep(2)], events).await;

    assert_eq!(transport.calls(), 3);
    assert_eq!(report.captured(), 2);

    let mut attempts = Vec::new();
    let mut retries = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::FetchAttempt { attempt, .. } => attempts.push(attempt),
            PipelineEvent::FetchRetryScheduled { .. } => retries += 1,
            _ => {}
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn captcha_skips_source_and_run_continues() {
    let harness = Harness::new();
    let captcha = r#"<html><body><form><div class="g-recaptcha" data-sitekey="k"></div></form></body></html>"#;
    let transport = Arc::new(ScriptedTransport::new(vec![ok(captcha.to_string()), ok(five_items())]));
    let askreddit = SourceConfig::new("AskReddit", SourceKind::Listing, 3);
    let events = EventBus::new(256);
    let mut rx = events.subscribe();

    let report = harness.run(transport.clone(), &[askreddit, nosleep(3)], events).await;

    // No retry on the CAPTCHA page
    assert_eq!(transport.calls(), 2);
    assert_eq!(report.outcomes[0].status, SourceStatus::Captcha);
    assert_eq!(report.outcomes[0].captured, 0);
    assert_eq!(report.outcomes[1].status, SourceStatus::Completed);
    assert_eq!(report.outcomes[1].captured, 3);
    assert!(harness.lines("listing_AskReddit.csv").is_empty());

    let mut skipped = false;
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::SourceSkipped { source, .. } = event {
            assert_eq!(source, "listing:AskReddit");
            skipped = true;
        }
    }
    assert!(skipped);
}

#[tokio::test]
async fn terminal_failure_skips_only_that_source() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Status(403)), ok(five_items())]));
    let askreddit = SourceConfig::new("AskReddit", SourceKind::Listing, 3);

    let report = harness.run(transport.clone(), &[askreddit, nosleep(1)], EventBus::default()).await;

    assert_eq!(transport.calls(), 2);
    assert_eq!(report.outcomes[0].status, SourceStatus::FetchFailed);
    assert_eq!(report.outcomes[1].captured, 1);
}

#[rstest]
#[case("crypto")]
#[case("CRYPTO")]
#[case("Crypto")]
#[case("cRyPtO")]
#[tokio::test]
async fn blocked_term_in_any_casing_is_never_persisted(#[case] term: &str) {
    let harness = Harness::new();
    let title = format!("Free {term} airdrop tonight");
    let html = listing_html(&[
        (title.as_str(), "/r/nosleep/comments/s1/", "99", "9 comments"),
        ("An honest story", "/r/nosleep/comments/s2/", "5", "1 comments"),
    ]);
    let transport = Arc::new(ScriptedTransport::new(vec![ok(html)]));

    let report = harness.run(transport, &[nosleep(5)], EventBus::default()).await;

    assert_eq!(report.captured(), 1);
    assert!(report.records.iter().all(|r| !r.title.to_lowercase().contains("crypto")));
    let content = harness.lines("listing_nosleep.csv").join("\n");
    assert!(!content.to_lowercase().contains("crypto"));
}

#[tokio::test]
async fn normalized_counts_reach_the_records() {
    let harness = Harness::new();
    let transport = Arc::new(ScriptedTransport::new(vec![ok(five_items())]));
    let report = harness.run(transport, &[nosleep(10)], EventBus::default()).await;

    let by_title = |title: &str| report.records.iter().find(|r| r.title == title).unwrap();
    assert_eq!(by_title("The thing in the attic").metric(Metric::Upvotes), 2400);
    assert_eq!(by_title("Night shift at the morgue").metric(Metric::Upvotes), 1024);
    assert_eq!(by_title("The lake at 3am").metric(Metric::Upvotes), 0);
    assert_eq!(by_title("The lake at 3am").metric(Metric::Comments), 0);
}
