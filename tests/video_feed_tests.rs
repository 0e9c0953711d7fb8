//! Video feed scenarios: driven browser sessions against a scripted driver,
//! including login-wall suspension and resume.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use feed_harvester::application::{HarvestPipeline, SourceStatus};
use feed_harvester::domain::{EventBus, Metric, PipelineEvent, SourceConfig, SourceKind};
use feed_harvester::infrastructure::browser::{DrivenFetcher, ResumeSignal};
use feed_harvester::infrastructure::config::{AppConfig, PacingConfig};
use feed_harvester::infrastructure::csv_store::CsvRecordStore;
use feed_harvester::infrastructure::http_client::HttpFetcher;
use feed_harvester::infrastructure::SourceFetcher;
use feed_harvester::test_utils::{ScriptedBrowser, ScriptedLauncher, ScriptedTransport, ScriptedVideo};

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pacing = PacingConfig::immediate();
    config
}

fn feed_source(limit: usize) -> SourceConfig {
    SourceConfig::new("scalingstories", SourceKind::VideoFeed, limit)
}

fn browser() -> ScriptedBrowser {
    ScriptedBrowser::new()
        .with_video(ScriptedVideo::new(
            "https://www.tiktok.com/@scalingstories/video/1",
            "How we scaled to 1M users",
            "1.2M",
            "3,402",
            "15K",
        ))
        .with_video(ScriptedVideo::new(
            "https://www.tiktok.com/@scalingstories/video/2",
            "Promote your startup with us",
            "10",
            "1",
            "0",
        ))
        .with_video(
            ScriptedVideo::new("https://www.tiktok.com/@scalingstories/video/3", "Broken", "1", "1", "1")
                .without_shares(),
        )
        .with_video(ScriptedVideo::new(
            "https://www.tiktok.com/@scalingstories/video/4",
            "Hiring our first engineer",
            "N/A",
            "",
            "2k",
        ))
}

fn pipeline(
    config: &AppConfig,
    browser: ScriptedBrowser,
    resume: ResumeSignal,
    events: EventBus,
    store: Arc<CsvRecordStore>,
) -> HarvestPipeline {
    let http = HttpFetcher::new(
        Arc::new(ScriptedTransport::new(Vec::new())),
        &config.http,
        config.pacing.clone(),
        events.clone(),
    )
    .unwrap();
    let driven = DrivenFetcher::new(
        Arc::new(ScriptedLauncher::new(browser)),
        config.browser.clone(),
        config.pacing.clone(),
        resume,
        events.clone(),
    );
    let fetcher = Arc::new(SourceFetcher::new(http, Some(driven)));
    HarvestPipeline::from_config(config, fetcher, store, events).unwrap()
}

#[tokio::test]
async fn feed_items_are_filtered_normalized_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CsvRecordStore::open(dir.path()).unwrap());
    let browser = browser();
    let handle = browser.handle();
    let config = config();

    let report = pipeline(&config, browser, ResumeSignal::new(), EventBus::default(), store)
        .run(&[feed_source(5)], &CancellationToken::new())
        .await;

    let outcome = report.outcome("video_feed:scalingstories").unwrap();
    assert_eq!(outcome.status, SourceStatus::Completed);
    assert_eq!(outcome.captured, 2);
    assert_eq!(outcome.spam_rejected, 1);
    assert_eq!(outcome.parse_errors, 1);

    let first = &report.records[0];
    assert_eq!(first.metric(Metric::Likes), 1_200_000);
    assert_eq!(first.metric(Metric::Comments), 3402);
    assert_eq!(first.metric(Metric::Shares), 15_000);
    let last = &report.records[1];
    assert_eq!(last.metric(Metric::Likes), 0);
    assert_eq!(last.metric(Metric::Comments), 0);
    assert_eq!(last.metric(Metric::Shares), 2000);

    // Every opened item was dismissed and the browser was shut down
    assert_eq!(handle.escapes(), 4);
    assert!(handle.closed());

    let content = fs::read_to_string(dir.path().join("video_feed_scalingstories.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "Date,Username,VideoURL,Description,Likes,Comments,Shares");
    assert_eq!(lines.len(), 3);
}

#[tokio::test]
async fn walk_stops_once_limit_is_reached() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CsvRecordStore::open(dir.path()).unwrap());
    let browser = browser();
    let handle = browser.handle();
    let config = config();

    let report = pipeline(&config, browser, ResumeSignal::new(), EventBus::default(), store)
        .run(&[feed_source(1)], &CancellationToken::new())
        .await;

    assert_eq!(report.captured(), 1);
    // Only the first item was opened
    assert_eq!(handle.escapes(), 1);
    assert!(handle.closed());
}

#[tokio::test]
async fn login_wall_suspends_until_resume_signal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CsvRecordStore::open(dir.path()).unwrap());
    let browser = browser().with_login_wall();
    let handle = browser.handle();
    let config = config();
    let resume = ResumeSignal::new();
    let events = EventBus::new(256);
    let mut operator_rx = events.subscribe();
    let mut audit_rx = events.subscribe();

    let pipeline = pipeline(&config, browser, resume.clone(), events, store);
    let sources = [feed_source(5)];
    let cancel = CancellationToken::new();

    let operator = async {
        loop {
            if let PipelineEvent::ResolutionNeeded { source, .. } = operator_rx.recv().await.unwrap() {
                assert_eq!(source, "video_feed:scalingstories");
                break;
            }
        }
        // Suspended: the wall is still up and nothing has been scrolled or read
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(handle.scrolls(), 0);
        assert_eq!(handle.escapes(), 0);
        resume.resume();
    };

    let (report, ()) = tokio::join!(pipeline.run(&sources, &cancel), operator);
    assert_eq!(report.captured(), 2);

    let mut order = Vec::new();
    while let Ok(event) = audit_rx.try_recv() {
        match event {
            PipelineEvent::ResolutionNeeded { .. } => order.push("resolution_needed"),
            PipelineEvent::Resumed { .. } => order.push("resumed"),
            PipelineEvent::RecordCaptured { .. } => order.push("captured"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["resolution_needed", "resumed", "captured", "captured"]);
}

#[tokio::test]
async fn feed_without_browser_support_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CsvRecordStore::open(dir.path()).unwrap());
    let config = config();
    let events = EventBus::default();
    let http = HttpFetcher::new(
        Arc::new(ScriptedTransport::new(Vec::new())),
        &config.http,
        config.pacing.clone(),
        events.clone(),
    )
    .unwrap();
    let fetcher = Arc::new(SourceFetcher::new(http, None));

    let report = HarvestPipeline::from_config(&config, fetcher, store, events)
        .unwrap()
        .run(&[feed_source(5)], &CancellationToken::new())
        .await;

    assert_eq!(report.outcomes[0].status, SourceStatus::FetchFailed);
    assert_eq!(report.captured(), 0);
}
