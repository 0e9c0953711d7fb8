//! Source fetching: one trait over both retrieval strategies

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{SourceConfig, SourceKind};
use crate::infrastructure::browser::{DrivenFetcher, FeedSession};
use crate::infrastructure::fetch_error::{FetchError, FetchResult};
pub use crate::infrastructure::http_client::ListingPage;
use crate::infrastructure::http_client::HttpFetcher;

/// Raw material handed to the parser
#[derive(Debug)]
pub enum Document {
    Listing(ListingPage),
    /// Live browser positioned on the feed's list view
    Feed(FeedSession),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> FetchResult<Document>;
}

/// Routes listings to plain HTTP and video feeds to the driven browser
pub struct SourceFetcher {
    http: HttpFetcher,
    driven: Option<DrivenFetcher>,
}

impl SourceFetcher {
    pub fn new(http: HttpFetcher, driven: Option<DrivenFetcher>) -> Self {
        Self { http, driven }
    }
}

#[async_trait]
impl Fetcher for SourceFetcher {
    async fn fetch(&self, source: &SourceConfig) -> FetchResult<Document> {
        match source.kind {
            SourceKind::Listing => self.http.fetch_listing(source).await.map(Document::Listing),
            SourceKind::VideoFeed => match &self.driven {
                Some(driven) => driven.open_feed(source).await.map(Document::Feed),
                None => {
                    warn!("⚠️ No browser available for {}", source.key());
                    Err(FetchError::terminal(
                        &source.target_url(),
                        "driven browser retrieval is not available in this build",
                    ))
                }
            },
        }
    }
}
