//! HTML and feed parsing infrastructure
//!
//! Turns a fetched [`Document`] into a finite, non-restartable stream of raw
//! candidates. Listing pages are parsed up front (bounded by the overscan
//! factor); video feeds are walked item by item in the live browser.

pub mod config;
pub mod context;
pub mod error;
pub mod listing_parser;
pub mod video_feed_parser;

// Re-export public types
pub use config::{ListingSelectors, ParsingConfig, VideoFeedSelectors};
pub use context::ParseContext;
pub use error::{ParsingError, ParsingResult};
pub use listing_parser::ListingParser;
pub use video_feed_parser::{FeedWalker, VideoFeedParser};

use std::vec;

use crate::domain::{RawCandidate, SourceConfig};
use crate::infrastructure::config::PacingConfig;
use crate::infrastructure::fetcher::Document;

/// Candidates pulled from one document, consumed lazily by the pipeline
pub enum Candidates {
    Listing(vec::IntoIter<ParsingResult<RawCandidate>>),
    Feed(FeedWalker),
}

impl Candidates {
    pub async fn next(&mut self) -> Option<ParsingResult<RawCandidate>> {
        match self {
            Self::Listing(items) => items.next(),
            Self::Feed(walker) => walker.next_candidate().await,
        }
    }

    /// Release whatever the document still holds (the browser, for feeds)
    pub async fn finish(self) {
        if let Self::Feed(walker) = self {
            walker.finish().await;
        }
    }
}

/// Dispatches a document to the parser for its kind
pub struct DocumentParser {
    listing: ListingParser,
    video_feed: VideoFeedParser,
    pacing: PacingConfig,
    overscan_factor: usize,
}

impl DocumentParser {
    pub fn new(config: &ParsingConfig, pacing: PacingConfig, overscan_factor: usize) -> ParsingResult<Self> {
        Ok(Self {
            listing: ListingParser::with_config(&config.listing)?,
            video_feed: VideoFeedParser::with_config(&config.video_feed),
            pacing,
            overscan_factor: overscan_factor.max(1),
        })
    }

    pub fn parse(&self, document: Document, source: &SourceConfig) -> Candidates {
        match document {
            Document::Listing(page) => {
                let ctx = ParseContext::new(source, &page.url, self.overscan_factor);
                Candidates::Listing(self.listing.parse(&page.body, &ctx).into_iter())
            }
            Document::Feed(feed) => {
                let ctx = ParseContext::new(source, &feed.url, self.overscan_factor);
                Candidates::Feed(self.video_feed.walk(feed, ctx, self.pacing.clone()))
            }
        }
    }
}
