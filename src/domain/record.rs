use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of remote source, which decides both the fetch strategy and the
/// column schema of the source's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Static HTML list page (old-reddit subreddit front page)
    Listing,
    /// Browser-driven short-video feed (account page)
    VideoFeed,
}

impl SourceKind {
    /// Stable key used in store file names and events
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::VideoFeed => "video_feed",
        }
    }

    /// Engagement metrics this kind of source reports, in column order
    pub const fn metrics(self) -> &'static [Metric] {
        match self {
            Self::Listing => &[Metric::Upvotes, Metric::Comments],
            Self::VideoFeed => &[Metric::Likes, Metric::Comments, Metric::Shares],
        }
    }

    fn default_url(self, name: &str) -> String {
        match self {
            Self::Listing => format!("https://old.reddit.com/r/{name}/top/?t=day"),
            Self::VideoFeed => format!("https://www.tiktok.com/@{name}"),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engagement metric names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Upvotes,
    Comments,
    Likes,
    Shares,
}

/// One configured origin to crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Subreddit name or account handle
    pub name: String,

    pub kind: SourceKind,

    /// Maximum number of new records to capture per run
    pub limit: usize,

    /// Explicit URL; derived from `kind` and `name` when absent
    #[serde(default)]
    pub url: Option<String>,

    /// Per-source block-list replacing the global one
    #[serde(default)]
    pub blocklist: Option<Vec<String>>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind, limit: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            limit,
            url: None,
            blocklist: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_blocklist<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocklist = Some(terms.into_iter().map(Into::into).collect());
        self
    }

    /// URL to fetch for this source
    pub fn target_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| self.kind.default_url(&self.name))
    }

    /// `kind:name`, unique per configured source
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }

    /// Subreddit names must be plain ASCII alphanumerics; feed handles may
    /// also carry `.` and `_`.
    pub fn has_valid_name(&self) -> bool {
        if self.name.is_empty() {
            return false;
        }
        match self.kind {
            SourceKind::Listing => self.name.chars().all(|c| c.is_ascii_alphanumeric()),
            SourceKind::VideoFeed => self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_'),
        }
    }
}

/// Extracted but not yet accepted record. Engagement values are the raw
/// strings as rendered by the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    pub source_name: String,
    /// Absolute URL, already resolved against the source origin
    pub identifier: String,
    pub title: String,
    pub raw_engagement: BTreeMap<Metric, String>,
}

impl RawCandidate {
    pub fn new(source_name: &str, identifier: String, title: String) -> Self {
        Self {
            source_name: source_name.to_string(),
            identifier,
            title,
            raw_engagement: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, metric: Metric, raw: impl Into<String>) -> Self {
        self.raw_engagement.insert(metric, raw.into());
        self
    }
}

/// One captured post or video. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub source_name: String,
    pub source_kind: SourceKind,
    pub identifier: String,
    pub title: String,
    pub engagement: BTreeMap<Metric, u64>,
    pub captured_at: DateTime<Utc>,
}

impl Record {
    /// Metric value, 0 when the source did not report it
    pub fn metric(&self, metric: Metric) -> u64 {
        self.engagement.get(&metric).copied().unwrap_or(0)
    }
}

/// Timestamp source that never goes backwards within a run, even if the
/// wall clock is adjusted mid-run.
#[derive(Debug, Default)]
pub struct RunClock {
    last: Option<DateTime<Utc>>,
}

impl RunClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> DateTime<Utc> {
        self.observe(Utc::now())
    }

    /// Clamp `candidate` so it is not earlier than any timestamp handed out before
    pub fn observe(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let stamped = match self.last {
            Some(last) if last > candidate => last,
            _ => candidate,
        };
        self.last = Some(stamped);
        stamped
    }
}
