//! Video feed walker
//!
//! Items are read one at a time from a live browser session: click the item,
//! read the detail view, press Escape, move on. Nothing is read ahead, so the
//! pipeline can stop the walk the moment it has enough records.

#![allow(clippy::uninlined_format_args)]

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::config::VideoFeedSelectors;
use super::{ParseContext, ParsingError, ParsingResult};
use crate::domain::{Metric, RawCandidate};
use crate::infrastructure::browser::{FeedSession, FeedState, Probe};
use crate::infrastructure::config::PacingConfig;

/// Builds [`FeedWalker`]s from loaded feed sessions
#[derive(Debug, Clone, Default)]
pub struct VideoFeedParser {
    selectors: VideoFeedSelectors,
}

impl VideoFeedParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(selectors: &VideoFeedSelectors) -> Self {
        Self {
            selectors: selectors.clone(),
        }
    }

    pub fn walk(&self, feed: FeedSession, ctx: ParseContext, pacing: PacingConfig) -> FeedWalker {
        FeedWalker {
            feed,
            selectors: self.selectors.clone(),
            ctx,
            pacing,
            total: None,
            index: 0,
        }
    }
}

/// Lazy, non-restartable walk over the items of one feed
pub struct FeedWalker {
    feed: FeedSession,
    selectors: VideoFeedSelectors,
    ctx: ParseContext,
    pacing: PacingConfig,
    total: Option<usize>,
    index: usize,
}

impl FeedWalker {
    pub const fn state(&self) -> FeedState {
        self.feed.state()
    }

    /// Read the next item; `None` once the feed is exhausted or the overscan
    /// bound is reached
    pub async fn next_candidate(&mut self) -> Option<ParsingResult<RawCandidate>> {
        if self.feed.state() == FeedState::Done {
            return None;
        }

        let total = match self.total {
            Some(total) => total,
            None => {
                let total = self.count_items().await;
                self.total = Some(total);
                total
            }
        };

        if self.index >= total {
            return None;
        }

        let index = self.index;
        self.index += 1;
        Some(self.read_item(index).await)
    }

    /// Quit the browser
    pub async fn finish(mut self) {
        self.feed.close().await;
    }

    async fn count_items(&mut self) -> usize {
        match self.feed.driver().count(&self.selectors.item).await {
            Probe::Found(count) => {
                let total = count.min(self.ctx.max_items());
                info!("🔍 Found {} videos for @{} (reading up to {})", count, self.ctx.source_name, total);
                total
            }
            Probe::NotFound => {
                warn!("❌ No videos found for @{}; access may be blocked", self.ctx.source_name);
                0
            }
            Probe::TransientFault(reason) => {
                warn!("❌ Could not list videos for @{}: {}", self.ctx.source_name, reason);
                0
            }
        }
    }

    async fn read_item(&mut self, index: usize) -> ParsingResult<RawCandidate> {
        if let Err(reason) = self
            .feed
            .driver()
            .click_nth(&self.selectors.item, index)
            .await
            .require("video item")
        {
            return Err(ParsingError::detail_view_failed(index, reason));
        }

        self.feed.set_state(FeedState::DetailView);
        sleep(self.pacing.detail_wait()).await;

        let result = self.read_detail(index).await;
        self.dismiss().await;
        result
    }

    async fn read_detail(&mut self, index: usize) -> ParsingResult<RawCandidate> {
        let driver = self.feed.driver();
        let fail = |reason: String| ParsingError::detail_view_failed(index, reason);

        let identifier = driver.current_url().await.require("current URL").map_err(fail)?;
        let description = driver
            .text(&self.selectors.description)
            .await
            .require("description")
            .map_err(fail)?;
        let likes = driver.text(&self.selectors.likes).await.require("like count").map_err(fail)?;
        let comments = driver
            .text(&self.selectors.comments)
            .await
            .require("comment count")
            .map_err(fail)?;
        let shares = driver.text(&self.selectors.shares).await.require("share count").map_err(fail)?;

        debug!("Read video {} of @{}: {}", index, self.ctx.source_name, identifier);
        Ok(RawCandidate::new(&self.ctx.source_name, identifier, description)
            .with_metric(Metric::Likes, likes)
            .with_metric(Metric::Comments, comments)
            .with_metric(Metric::Shares, shares))
    }

    /// Close the detail popup and return to the list
    async fn dismiss(&mut self) {
        if let Probe::TransientFault(reason) = self.feed.driver().press_escape().await {
            debug!("Escape press faulted: {}", reason);
        }
        sleep(self.pacing.dismiss_wait()).await;
        self.feed.set_state(FeedState::ListView);
    }
}
