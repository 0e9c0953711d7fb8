//! `feed-harvester [config-path]`
//!
//! Runs one harvest over the configured sources and prints a per-source
//! summary. When a login wall suspends a feed, pressing Enter resumes it.

#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use feed_harvester::application::{HarvestPipeline, HarvestReport};
use feed_harvester::domain::{EventBus, PipelineEvent};
use feed_harvester::infrastructure::browser::{DrivenFetcher, ResumeSignal};
use feed_harvester::infrastructure::logging::{init_logging_with_config, log_system_info};
use feed_harvester::infrastructure::{
    AppConfig, CostLedger, CsvRecordStore, HttpFetcher, ReqwestTransport, SourceFetcher,
};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run());

    // A pending stdin read must not keep the process alive
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

async fn run() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging_with_config(&config.logging).context("Failed to initialize logging")?;
    log_system_info();

    if config.sources.is_empty() {
        warn!("⚠️ No sources configured, nothing to do");
        return Ok(());
    }

    let events = EventBus::new(config.pipeline.event_capacity);
    let resume = ResumeSignal::new();

    let transport = Arc::new(ReqwestTransport::with_config(&config.http)?);
    let http = HttpFetcher::new(transport, &config.http, config.pacing.clone(), events.clone())?;
    let driven = driven_fetcher(&config, resume.clone(), events.clone());
    let fetcher = Arc::new(SourceFetcher::new(http, driven));

    let store = Arc::new(
        CsvRecordStore::open(&config.storage.data_dir).context("Failed to open record store")?,
    );

    let mut pipeline = HarvestPipeline::from_config(&config, fetcher, store, events.clone())?;
    if config.budget.enabled {
        let ledger = CostLedger::open(config.budget.clone()).context("Failed to open cost ledger")?;
        ledger.check_and_top_up(Local::now().date_naive())?;
        pipeline = pipeline.with_budget(Arc::new(ledger));
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    spawn_resume_prompter(&events, resume);

    let report = pipeline.run(&config.sources, &cancel).await;
    print_summary(&report);
    Ok(())
}

#[cfg(feature = "browser")]
fn driven_fetcher(config: &AppConfig, resume: ResumeSignal, events: EventBus) -> Option<DrivenFetcher> {
    use feed_harvester::infrastructure::ChromiumLauncher;

    Some(DrivenFetcher::new(
        Arc::new(ChromiumLauncher::new()),
        config.browser.clone(),
        config.pacing.clone(),
        resume,
        events,
    ))
}

#[cfg(not(feature = "browser"))]
fn driven_fetcher(config: &AppConfig, _resume: ResumeSignal, _events: EventBus) -> Option<DrivenFetcher> {
    use feed_harvester::domain::SourceKind;

    if config.sources.iter().any(|s| s.kind == SourceKind::VideoFeed) {
        warn!("⚠️ Video feed sources need the `browser` feature; they will be skipped");
    }
    None
}

/// First Ctrl-C stops the run after the current source
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, stopping after the current source");
            cancel.cancel();
        }
    });
}

/// Wait for Enter on stdin whenever a login wall needs manual resolution.
/// The prompt is dropped if the wall clears before the operator answers.
fn spawn_resume_prompter(events: &EventBus, resume: ResumeSignal) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::ResolutionNeeded { source, url }) => {
                    println!("🔐 {} requires login at {}", source, url);
                    println!("⏳ Log in in the browser window, then press Enter to continue...");
                    tokio::select! {
                        line = stdin.next_line() => match line {
                            Ok(_) => resume.resume(),
                            Err(e) => error!("Failed to read from stdin: {}", e),
                        },
                        resumed = resumed_without_input(&mut rx, &source) => {
                            if resumed {
                                println!("🔓 {} continued without input", source);
                            } else {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Event listener lagged by {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// True once `source` resumes on its own, false if the event bus closes
async fn resumed_without_input(rx: &mut Receiver<PipelineEvent>, source: &str) -> bool {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::Resumed { source: resumed }) if resumed == source => return true,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return false,
        }
    }
}

fn print_summary(report: &HarvestReport) {
    println!();
    println!("📊 Harvest {} finished", report.run_id);
    for outcome in &report.outcomes {
        println!(
            "  {:<32} {:<18} captured={:<4} spam={:<3} duplicate={:<3} parse_errors={:<3} persist_errors={}",
            outcome.source,
            format!("{:?}", outcome.status),
            outcome.captured,
            outcome.spam_rejected,
            outcome.duplicate_rejected,
            outcome.parse_errors,
            outcome.persist_errors,
        );
    }
    println!("✅ {} new records", report.captured());
    info!("Run {} stored {} new records", report.run_id, report.captured());
}
