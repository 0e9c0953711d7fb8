//! Parsing context
//!
//! Per-source state the parsers need: who the items belong to, where
//! relative links point, and how many raw items to look at.

use url::Url;

use crate::domain::SourceConfig;

/// Context information for parsing one source's document
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub source_name: String,

    /// Origin relative links are resolved against
    pub base_url: String,

    /// New records wanted from this source
    pub limit: usize,

    /// Raw items scanned per wanted record
    pub overscan_factor: usize,
}

impl ParseContext {
    /// Context for `source`, with the base origin taken from `page_url`
    pub fn new(source: &SourceConfig, page_url: &str, overscan_factor: usize) -> Self {
        let base_url = Url::parse(page_url)
            .map(|url| url.origin().ascii_serialization())
            .unwrap_or_else(|_| page_url.to_string());
        Self {
            source_name: source.name.clone(),
            base_url,
            limit: source.limit,
            overscan_factor,
        }
    }

    /// Upper bound on raw items pulled from the document
    pub const fn max_items(&self) -> usize {
        self.limit.saturating_mul(self.overscan_factor)
    }
}
