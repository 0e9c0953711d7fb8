//! Driven browser retrieval for video feeds
//!
//! The browser is modelled as an explicit state machine:
//!
//! ```text
//! Navigating -> (Blocked <-> awaiting resume) -> ListView
//!            -> [ListView -> DetailView -> ListView]* -> Done
//! ```
//!
//! Every driver interaction answers with a [`Probe`] so the fetcher and the
//! feed walker can be exercised against a scripted session in tests.

#![allow(clippy::uninlined_format_args)]

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::{EventBus, PipelineEvent, SourceConfig};
use crate::infrastructure::config::{BrowserConfig, PacingConfig};
use crate::infrastructure::fetch_error::{FetchError, FetchResult};

/// Outcome of a single driver interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Found(T),
    NotFound,
    /// Driver hiccup (stale element, detached frame, protocol error)
    TransientFault(String),
}

impl<T> Probe<T> {
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Convert into a `Result`, naming what was being looked for
    pub fn require(self, what: &str) -> Result<T, String> {
        match self {
            Self::Found(value) => Ok(value),
            Self::NotFound => Err(format!("{} not found", what)),
            Self::TransientFault(reason) => Err(format!("{}: {}", what, reason)),
        }
    }
}

/// Where a driven session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Navigating,
    /// Login wall in front of the content, waiting for resolution
    Blocked,
    ListView,
    DetailView,
    Done,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Navigating => "navigating",
            Self::Blocked => "blocked",
            Self::ListView => "list_view",
            Self::DetailView => "detail_view",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// One live browser tab
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Probe<()>;

    /// Number of elements matching `selector`; `NotFound` when there are none
    async fn count(&mut self, selector: &str) -> Probe<usize>;

    /// Visible text of the first element matching `selector`
    async fn text(&mut self, selector: &str) -> Probe<String>;

    /// Click the `index`-th element matching `selector`
    async fn click_nth(&mut self, selector: &str, index: usize) -> Probe<()>;

    async fn current_url(&mut self) -> Probe<String>;

    async fn scroll_to_bottom(&mut self) -> Probe<()>;

    async fn press_escape(&mut self) -> Probe<()>;

    /// Quit the browser; further calls are undefined
    async fn close(&mut self);
}

/// Browser lifecycle: every launch yields a fresh session
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> anyhow::Result<Box<dyn BrowserSession>>;
}

/// Resume signal for a login-wall suspension
///
/// Every resume bumps a generation counter. A suspension only reacts to
/// resumes sent after it started, so a late Enter meant for an earlier wall
/// cannot release a later one.
#[derive(Debug, Clone)]
pub struct ResumeSignal {
    generation: Arc<watch::Sender<u64>>,
}

impl Default for ResumeSignal {
    fn default() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            generation: Arc::new(generation),
        }
    }
}

impl ResumeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Start listening; earlier resumes are already marked as seen
    pub fn suspend(&self) -> Suspension {
        Suspension {
            rx: self.generation.subscribe(),
        }
    }
}

/// One login-wall suspension, released by the next resume
#[derive(Debug)]
pub struct Suspension {
    rx: watch::Receiver<u64>,
}

impl Suspension {
    pub async fn resumed(&mut self) {
        if self.rx.changed().await.is_err() {
            // Every signal is gone, so nothing can resume this wall
            std::future::pending::<()>().await;
        }
    }
}

/// Browser session positioned on a loaded feed, handed to the feed parser
pub struct FeedSession {
    pub url: String,
    session: Box<dyn BrowserSession>,
    state: FeedState,
}

impl FeedSession {
    pub fn new(url: impl Into<String>, session: Box<dyn BrowserSession>) -> Self {
        Self {
            url: url.into(),
            session,
            state: FeedState::ListView,
        }
    }

    pub const fn state(&self) -> FeedState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FeedState) {
        debug!("Feed session {} -> {}", self.url, state);
        self.state = state;
    }

    pub(crate) fn driver(&mut self) -> &mut dyn BrowserSession {
        self.session.as_mut()
    }

    /// Quit the browser and mark the walk as finished
    pub async fn close(&mut self) {
        if self.state != FeedState::Done {
            self.session.close().await;
            self.set_state(FeedState::Done);
        }
    }
}

impl fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSession")
            .field("url", &self.url)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Opens video feeds in a driven browser
pub struct DrivenFetcher {
    launcher: Arc<dyn BrowserLauncher>,
    config: BrowserConfig,
    pacing: PacingConfig,
    resume: ResumeSignal,
    events: EventBus,
}

impl DrivenFetcher {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        config: BrowserConfig,
        pacing: PacingConfig,
        resume: ResumeSignal,
        events: EventBus,
    ) -> Self {
        Self {
            launcher,
            config,
            pacing,
            resume,
            events,
        }
    }

    /// Launch, navigate, wait out any login wall and scroll the feed
    pub async fn open_feed(&self, source: &SourceConfig) -> FetchResult<FeedSession> {
        let url = source.target_url();
        info!("🚀 Launching browser for {}", source.key());

        let session = self
            .launcher
            .launch(&self.config)
            .await
            .map_err(|e| FetchError::terminal(&url, format!("browser launch failed: {:#}", e)))?;

        let mut feed = FeedSession {
            url: url.clone(),
            session,
            state: FeedState::Navigating,
        };

        match self.prepare(source, &mut feed).await {
            Ok(()) => {
                feed.set_state(FeedState::ListView);
                Ok(feed)
            }
            Err(e) => {
                feed.close().await;
                Err(e)
            }
        }
    }

    async fn prepare(&self, source: &SourceConfig, feed: &mut FeedSession) -> FetchResult<()> {
        let url = feed.url.clone();
        if let Err(reason) = feed.driver().navigate(&url).await.require("navigation") {
            warn!("❌ Error loading {}: {}", url, reason);
            return Err(FetchError::terminal(&url, reason));
        }

        sleep(self.pacing.render_wait()).await;
        sleep(self.pacing.login_check_wait()).await;

        if self.login_wall_present(feed).await {
            feed.set_state(FeedState::Blocked);
            self.await_resolution(source, feed).await;
        }

        for cycle in 0..self.config.scroll_cycles {
            if let Probe::TransientFault(reason) = feed.driver().scroll_to_bottom().await {
                debug!("Scroll cycle {} faulted: {}", cycle + 1, reason);
            }
            sleep(self.pacing.scroll_wait()).await;
        }
        Ok(())
    }

    async fn login_wall_present(&self, feed: &mut FeedSession) -> bool {
        feed.driver()
            .count(&self.config.login_wall_selector)
            .await
            .is_found()
    }

    /// Suspend until the resume signal arrives or polling sees the wall gone.
    /// No timeout.
    async fn await_resolution(&self, source: &SourceConfig, feed: &mut FeedSession) {
        let key = source.key();
        let mut suspension = self.resume.suspend();
        self.events.publish(PipelineEvent::ResolutionNeeded {
            source: key.clone(),
            url: feed.url.clone(),
        });

        loop {
            tokio::select! {
                () = suspension.resumed() => {
                    debug!("Resume signal received for {}", key);
                    break;
                }
                () = sleep(self.pacing.login_poll_interval().max(std::time::Duration::from_millis(50))) => {
                    if !self.login_wall_present(feed).await {
                        debug!("Login wall cleared on {}", key);
                        break;
                    }
                }
            }
        }

        self.events.publish(PipelineEvent::Resumed { source: key });
    }
}

/// Launch switches that keep the automation fingerprint down
pub fn stealth_args(config: &BrowserConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "--disable-gpu",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-blink-features=AutomationControlled",
        "--disable-infobars",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("--window-size={},{}", config.window_width, config.window_height));
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Script run on every new document to hide `navigator.webdriver`
pub const HIDE_WEBDRIVER_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";
