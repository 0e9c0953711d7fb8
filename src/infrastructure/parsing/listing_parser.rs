//! Listing page parser (old-reddit markup)
//!
//! `scraper::Html` is not `Send`, so a page is parsed in one synchronous pass
//! into a bounded list of per-item results. The pipeline consumes that list
//! lazily and stops once it has enough accepted records.

#![allow(clippy::uninlined_format_args)]

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::config::ListingSelectors;
use super::{ParseContext, ParsingError, ParsingResult};
use crate::domain::{Metric, RawCandidate};

/// Parser for extracting posts from listing pages
pub struct ListingParser {
    item: Selector,
    title_link: Selector,
    score: Vec<Selector>,
    anchor: Selector,
    comments_marker: String,
}

impl ListingParser {
    /// Create a new listing parser with default selectors
    pub fn new() -> ParsingResult<Self> {
        Self::with_config(&ListingSelectors::default())
    }

    /// Create parser with custom selector configuration
    pub fn with_config(selectors: &ListingSelectors) -> ParsingResult<Self> {
        Ok(Self {
            item: compile(&selectors.item)?,
            title_link: compile(&selectors.title_link)?,
            score: selectors
                .score
                .iter()
                .map(|s| compile(s))
                .collect::<ParsingResult<Vec<_>>>()?,
            anchor: compile(&selectors.anchor)?,
            comments_marker: selectors.comments_marker.to_lowercase(),
        })
    }

    /// Extract at most `ctx.max_items()` raw items in document order
    pub fn parse(&self, html: &str, ctx: &ParseContext) -> Vec<ParsingResult<RawCandidate>> {
        let document = Html::parse_document(html);
        let results: Vec<_> = document
            .select(&self.item)
            .take(ctx.max_items())
            .map(|element| self.extract_candidate(&element, ctx))
            .collect();

        if results.is_empty() {
            warn!("❌ No posts found for {}", ctx.source_name);
        } else {
            debug!("Found {} posts for {}", results.len(), ctx.source_name);
        }
        results
    }

    fn extract_candidate(&self, element: &ElementRef, ctx: &ParseContext) -> ParsingResult<RawCandidate> {
        let link = element
            .select(&self.title_link)
            .next()
            .ok_or_else(|| ParsingError::required_field_missing("title", Some("listing item")))?;

        let title = element_text(&link);
        let href = link
            .value()
            .attr("href")
            .ok_or_else(|| ParsingError::required_field_missing("href", Some("title link")))?;
        let identifier = resolve_url(href, &ctx.base_url)?;

        Ok(RawCandidate::new(&ctx.source_name, identifier, title)
            .with_metric(Metric::Upvotes, self.extract_score(element))
            .with_metric(Metric::Comments, self.extract_comments(element)))
    }

    /// First score element that is present; absent entirely reads as "0"
    fn extract_score(&self, element: &ElementRef) -> String {
        self.score
            .iter()
            .find_map(|selector| element.select(selector).next())
            .map(|score| element_text(&score))
            .unwrap_or_else(|| "0".to_string())
    }

    /// Leading token of the first anchor mentioning comments ("12 comments" -> "12")
    fn extract_comments(&self, element: &ElementRef) -> String {
        element
            .select(&self.anchor)
            .map(|anchor| element_text(&anchor))
            .find(|text| text.to_lowercase().contains(&self.comments_marker))
            .and_then(|text| text.split_whitespace().next().map(str::to_string))
            .unwrap_or_else(|| "0".to_string())
    }
}

fn compile(selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(selector, e))
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Resolve `href` against the source origin; absolute links pass through
fn resolve_url(href: &str, base_url: &str) -> ParsingResult<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }

    let base = Url::parse(base_url)
        .map_err(|e| ParsingError::url_resolution_failed(href, e, Some(base_url)))?;
    base.join(href)
        .map(|resolved| resolved.to_string())
        .map_err(|e| ParsingError::url_resolution_failed(href, e, Some(base_url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceConfig, SourceKind};
    use rstest::rstest;

    fn ctx(limit: usize) -> ParseContext {
        let source = SourceConfig::new("nosleep", SourceKind::Listing, limit);
        ParseContext::new(&source, "https://old.reddit.com/r/nosleep/top/?t=day", 2)
    }

    fn thing(title: &str, href: &str, score_class: &str, score: &str, comments: &str) -> String {
        format!(
            r#"<div class="thing">
                 <div class="score {score_class}">{score}</div>
                 <a class="title" href="{href}">{title}</a>
                 <ul><li><a href="{href}">share</a></li><li><a href="{href}">{comments}</a></li></ul>
               </div>"#
        )
    }

    #[test]
    fn test_parse_listing_items() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            thing("First post", "/r/nosleep/comments/abc/first/", "unvoted", "1.2k", "34 comments"),
            thing("Second", "https://old.reddit.com/r/nosleep/comments/def/", "likes", "57", "comment"),
        );
        let results = ListingParser::new().unwrap().parse(&html, &ctx(5));
        assert_eq!(results.len(), 2);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.identifier, "https://old.reddit.com/r/nosleep/comments/abc/first/");
        assert_eq!(first.title, "First post");
        assert_eq!(first.raw_engagement[&Metric::Upvotes], "1.2k");
        assert_eq!(first.raw_engagement[&Metric::Comments], "34");

        let second = results[1].as_ref().unwrap();
        assert_eq!(second.identifier, "https://old.reddit.com/r/nosleep/comments/def/");
        assert_eq!(second.raw_engagement[&Metric::Upvotes], "57");
        assert_eq!(second.raw_engagement[&Metric::Comments], "0");
    }

    #[test]
    fn test_missing_title_is_per_item_error() {
        let html = format!(
            r#"<div class="thing"><div class="score unvoted">3</div></div>{}"#,
            thing("Kept", "/r/nosleep/comments/x/", "unvoted", "3", "1 comments")
        );
        let results = ListingParser::new().unwrap().parse(&html, &ctx(5));
        assert!(matches!(results[0], Err(ParsingError::RequiredFieldMissing { ref field, .. }) if field == "title"));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_overscan_caps_items() {
        let html: String = (0..10)
            .map(|i| thing(&format!("post {i}"), &format!("/r/nosleep/comments/{i}/"), "unvoted", "1", "0 comments"))
            .collect();
        let results = ListingParser::new().unwrap().parse(&html, &ctx(3));
        assert_eq!(results.len(), 6);
    }

    #[rstest]
    #[case("/r/a/comments/1/", "https://old.reddit.com/r/a/comments/1/")]
    #[case("https://example.com/x", "https://example.com/x")]
    #[case("r/a/", "https://old.reddit.com/r/a/")]
    fn test_resolve_url(#[case] href: &str, #[case] expected: &str) {
        assert_eq!(resolve_url(href, "https://old.reddit.com").unwrap(), expected);
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let selectors = ListingSelectors {
            item: "div[".to_string(),
            ..ListingSelectors::default()
        };
        assert!(matches!(
            ListingParser::with_config(&selectors),
            Err(ParsingError::InvalidSelector { .. })
        ));
    }
}
