//! Test utilities for the harvest pipeline
//!
//! Scripted stand-ins for every external seam: HTTP transport, browser
//! session and launcher, fetcher, record store and budget gate. Compiled for
//! unit tests and for the `test-utils` feature used by the integration tests.

#![allow(clippy::missing_const_for_fn)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::application::budget::{BudgetError, BudgetGate, Charge, TaskKind};
use crate::domain::{Record, SourceConfig};
use crate::infrastructure::browser::{BrowserLauncher, BrowserSession, FeedSession, Probe};
use crate::infrastructure::config::{BrowserConfig, defaults};
use crate::infrastructure::cost_ledger::estimate;
use crate::infrastructure::csv_store::{PersistenceError, PersistenceResult, RecordStore};
use crate::infrastructure::fetch_error::{FetchError, FetchResult};
use crate::infrastructure::fetcher::{Document, Fetcher, ListingPage};
use crate::infrastructure::http_client::{HttpTransport, TransportError};
use crate::infrastructure::parsing::VideoFeedSelectors;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Old-reddit style listing page; items are `(title, href, score, comments link text)`
pub fn listing_html(items: &[(&str, &str, &str, &str)]) -> String {
    let things: String = items
        .iter()
        .map(|(title, href, score, comments)| {
            format!(
                r#"<div class="thing">
                     <div class="score unvoted">{score}</div>
                     <p class="title"><a class="title" href="{href}">{title}</a></p>
                     <ul class="flat-list buttons">
                       <li class="first"><a class="comments" href="{href}">{comments}</a></li>
                       <li><a href="{href}">share</a></li>
                     </ul>
                   </div>"#
            )
        })
        .collect();
    format!(r#"<html><body><div id="siteTable">{things}</div></body></html>"#)
}

/// HTTP transport answering from a fixed script
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<String, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get_text(&self, _url: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
    }
}

/// One video in a scripted feed
#[derive(Debug, Clone)]
pub struct ScriptedVideo {
    pub url: String,
    pub description: String,
    pub likes: Option<String>,
    pub comments: Option<String>,
    pub shares: Option<String>,
}

impl ScriptedVideo {
    pub fn new(url: &str, description: &str, likes: &str, comments: &str, shares: &str) -> Self {
        Self {
            url: url.to_string(),
            description: description.to_string(),
            likes: Some(likes.to_string()),
            comments: Some(comments.to_string()),
            shares: Some(shares.to_string()),
        }
    }

    pub fn without_shares(mut self) -> Self {
        self.shares = None;
        self
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    login_wall: bool,
    navigation_fault: Option<String>,
    videos: Vec<ScriptedVideo>,
    open: Option<usize>,
    navigations: Vec<String>,
    scrolls: usize,
    escapes: usize,
    closed: bool,
}

/// In-memory browser session driven by the default selectors
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    state: Arc<Mutex<BrowserState>>,
}

/// Observer for a [`ScriptedBrowser`] after it has been handed off
#[derive(Clone)]
pub struct BrowserHandle {
    state: Arc<Mutex<BrowserState>>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login_wall(self) -> Self {
        lock(&self.state).login_wall = true;
        self
    }

    pub fn with_navigation_fault(self, reason: &str) -> Self {
        lock(&self.state).navigation_fault = Some(reason.to_string());
        self
    }

    pub fn with_video(self, video: ScriptedVideo) -> Self {
        lock(&self.state).videos.push(video);
        self
    }

    pub fn handle(&self) -> BrowserHandle {
        BrowserHandle {
            state: self.state.clone(),
        }
    }
}

impl BrowserHandle {
    pub fn clear_login_wall(&self) {
        lock(&self.state).login_wall = false;
    }

    pub fn navigations(&self) -> Vec<String> {
        lock(&self.state).navigations.clone()
    }

    pub fn scrolls(&self) -> usize {
        lock(&self.state).scrolls
    }

    pub fn escapes(&self) -> usize {
        lock(&self.state).escapes
    }

    pub fn closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn navigate(&mut self, url: &str) -> Probe<()> {
        let mut state = lock(&self.state);
        state.navigations.push(url.to_string());
        match &state.navigation_fault {
            Some(reason) => Probe::TransientFault(reason.clone()),
            None => Probe::Found(()),
        }
    }

    async fn count(&mut self, selector: &str) -> Probe<usize> {
        let state = lock(&self.state);
        let count = if selector == defaults::LOGIN_WALL_SELECTOR {
            usize::from(state.login_wall)
        } else if selector == VideoFeedSelectors::default().item {
            state.videos.len()
        } else {
            0
        };
        if count == 0 { Probe::NotFound } else { Probe::Found(count) }
    }

    async fn text(&mut self, selector: &str) -> Probe<String> {
        let state = lock(&self.state);
        let Some(video) = state.open.and_then(|i| state.videos.get(i)) else {
            return Probe::NotFound;
        };
        let selectors = VideoFeedSelectors::default();
        let value = if selector == selectors.description {
            Some(video.description.clone())
        } else if selector == selectors.likes {
            video.likes.clone()
        } else if selector == selectors.comments {
            video.comments.clone()
        } else if selector == selectors.shares {
            video.shares.clone()
        } else {
            None
        };
        value.map_or(Probe::NotFound, Probe::Found)
    }

    async fn click_nth(&mut self, _selector: &str, index: usize) -> Probe<()> {
        let mut state = lock(&self.state);
        if index < state.videos.len() {
            state.open = Some(index);
            Probe::Found(())
        } else {
            Probe::NotFound
        }
    }

    async fn current_url(&mut self) -> Probe<String> {
        let state = lock(&self.state);
        match state.open.and_then(|i| state.videos.get(i)) {
            Some(video) => Probe::Found(video.url.clone()),
            None => state.navigations.last().cloned().map_or(Probe::NotFound, Probe::Found),
        }
    }

    async fn scroll_to_bottom(&mut self) -> Probe<()> {
        lock(&self.state).scrolls += 1;
        Probe::Found(())
    }

    async fn press_escape(&mut self) -> Probe<()> {
        let mut state = lock(&self.state);
        state.escapes += 1;
        state.open = None;
        Probe::Found(())
    }

    async fn close(&mut self) {
        lock(&self.state).closed = true;
    }
}

/// Launcher handing out the same scripted browser on every launch
pub struct ScriptedLauncher {
    browser: ScriptedBrowser,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(browser: ScriptedBrowser) -> Self {
        Self {
            browser,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, _config: &BrowserConfig) -> anyhow::Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.browser.clone()))
    }
}

enum StaticResponse {
    Listing(String),
    Feed(ScriptedBrowser),
    Fail(FetchError),
}

/// Fetcher serving canned documents per source key
#[derive(Default)]
pub struct StaticFetcher {
    responses: HashMap<String, StaticResponse>,
    fetched: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, source: &SourceConfig, html: impl Into<String>) -> Self {
        self.responses.insert(source.key(), StaticResponse::Listing(html.into()));
        self
    }

    pub fn with_feed(mut self, source: &SourceConfig, browser: ScriptedBrowser) -> Self {
        self.responses.insert(source.key(), StaticResponse::Feed(browser));
        self
    }

    pub fn with_error(mut self, source: &SourceConfig, error: FetchError) -> Self {
        self.responses.insert(source.key(), StaticResponse::Fail(error));
        self
    }

    /// Source keys fetched so far, in order
    pub fn fetched(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, source: &SourceConfig) -> FetchResult<Document> {
        lock(&self.fetched).push(source.key());
        let url = source.target_url();
        match self.responses.get(&source.key()) {
            Some(StaticResponse::Listing(body)) => Ok(Document::Listing(ListingPage {
                url,
                body: body.clone(),
            })),
            Some(StaticResponse::Feed(browser)) => Ok(Document::Feed(FeedSession::new(url, Box::new(browser.clone())))),
            Some(StaticResponse::Fail(error)) => Err(error.clone()),
            None => Err(FetchError::terminal(&url, "no scripted response")),
        }
    }
}

/// Record store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    seeded: Mutex<HashMap<String, HashSet<String>>>,
    unreadable: HashSet<String>,
    appended: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifiers<I, S>(source: &SourceConfig, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        lock(&store.seeded).insert(source.key(), identifiers.into_iter().map(Into::into).collect());
        store
    }

    /// Loading identifiers for `source` fails
    pub fn with_unreadable(mut self, source: &SourceConfig) -> Self {
        self.unreadable.insert(source.key());
        self
    }

    pub fn appended(&self) -> Vec<Record> {
        lock(&self.appended).clone()
    }
}

impl RecordStore for MemoryStore {
    fn load_identifiers(&self, source: &SourceConfig) -> PersistenceResult<HashSet<String>> {
        let key = source.key();
        if self.unreadable.contains(&key) {
            return Err(PersistenceError::MissingColumn {
                path: format!("memory/{key}").into(),
                column: "URL".to_string(),
            });
        }
        let mut identifiers = lock(&self.seeded).get(&key).cloned().unwrap_or_default();
        identifiers.extend(
            lock(&self.appended)
                .iter()
                .filter(|r| format!("{}:{}", r.source_kind, r.source_name) == key)
                .map(|r| r.identifier.clone()),
        );
        Ok(identifiers)
    }

    fn append(&self, record: &Record) -> PersistenceResult<()> {
        lock(&self.appended).push(record.clone());
        Ok(())
    }
}

/// Store whose every append fails
pub struct FailingStore;

impl RecordStore for FailingStore {
    fn load_identifiers(&self, _source: &SourceConfig) -> PersistenceResult<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn append(&self, _record: &Record) -> PersistenceResult<()> {
        Err(PersistenceError::Io {
            path: "memory".into(),
            source: std::io::Error::other("disk full"),
        })
    }
}

/// Budget gate with an in-memory balance
pub struct MemoryBudget {
    remaining: Mutex<f64>,
    charges: Mutex<Vec<TaskKind>>,
}

impl MemoryBudget {
    pub fn new(remaining: f64) -> Self {
        Self {
            remaining: Mutex::new(remaining),
            charges: Mutex::new(Vec::new()),
        }
    }

    pub fn charges(&self) -> Vec<TaskKind> {
        lock(&self.charges).clone()
    }

    pub fn remaining(&self) -> f64 {
        *lock(&self.remaining)
    }
}

impl BudgetGate for MemoryBudget {
    fn estimate_cost(&self, task: &TaskKind) -> f64 {
        estimate(task)
    }

    fn can_afford(&self, task: &TaskKind) -> bool {
        self.remaining() - estimate(task) >= 0.0
    }

    fn log_cost(&self, task: &TaskKind, actual: Option<f64>) -> Result<Charge, BudgetError> {
        if !self.can_afford(task) {
            return Ok(Charge::Refused {
                remaining: self.remaining(),
            });
        }
        let cost = actual.unwrap_or_else(|| estimate(task));
        let mut remaining = lock(&self.remaining);
        *remaining -= cost;
        lock(&self.charges).push(task.clone());
        Ok(Charge::Charged {
            cost,
            remaining: *remaining,
        })
    }
}
