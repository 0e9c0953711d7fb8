//! Parsing configuration for HTML extraction
//!
//! Centralized CSS selectors for both source kinds. Selectors are plain
//! strings here and compiled once when a parser is built.

use serde::{Deserialize, Serialize};

/// Main parsing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub listing: ListingSelectors,
    pub video_feed: VideoFeedSelectors,
}

/// CSS selectors for old-reddit listing pages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// One per post
    pub item: String,

    /// Title text and permalink
    pub title_link: String,

    /// Score element, tried in order
    pub score: Vec<String>,

    /// Anchors scanned for the comment count
    pub anchor: String,

    /// Anchor text marking the comments link
    pub comments_marker: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item: "div.thing".to_string(),
            title_link: "a.title".to_string(),
            score: vec![
                "div.score.unvoted".to_string(),
                "div.score.likes".to_string(),
                "div.score.dislikes".to_string(),
            ],
            anchor: "a".to_string(),
            comments_marker: "comments".to_string(),
        }
    }
}

/// CSS selectors for the video feed list and detail views
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoFeedSelectors {
    pub item: String,
    pub description: String,
    pub likes: String,
    pub comments: String,
    pub shares: String,
}

impl Default for VideoFeedSelectors {
    fn default() -> Self {
        Self {
            item: r#"div[data-e2e="user-post-item"]"#.to_string(),
            description: r#"div[data-e2e="video-desc"]"#.to_string(),
            likes: r#"strong[data-e2e="like-count"]"#.to_string(),
            comments: r#"strong[data-e2e="comment-count"]"#.to_string(),
            shares: r#"strong[data-e2e="share-count"]"#.to_string(),
        }
    }
}
