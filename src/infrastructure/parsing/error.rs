//! Parsing error types
//!
//! Errors are per candidate: one unreadable item never ends the source.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    #[error("Required field '{field}' not found")]
    RequiredFieldMissing {
        field: String,
        context: Option<String>,
    },

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("URL resolution failed: {url} - {reason}")]
    UrlResolutionFailed {
        url: String,
        reason: String,
        base_url: Option<String>,
    },

    /// Driver interaction failed while the item was open
    #[error("Feed item {index} could not be read: {reason}")]
    DetailViewFailed { index: usize, reason: String },
}

impl ParsingError {
    pub fn required_field_missing(field: &str, context: Option<&str>) -> Self {
        Self::RequiredFieldMissing {
            field: field.to_string(),
            context: context.map(|s| s.to_string()),
        }
    }

    pub fn invalid_selector(selector: &str, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn url_resolution_failed(url: &str, reason: impl ToString, base_url: Option<&str>) -> Self {
        Self::UrlResolutionFailed {
            url: url.to_string(),
            reason: reason.to_string(),
            base_url: base_url.map(|s| s.to_string()),
        }
    }

    pub fn detail_view_failed(index: usize, reason: impl Into<String>) -> Self {
        Self::DetailViewFailed {
            index,
            reason: reason.into(),
        }
    }

    /// Check if the source can keep going after this error
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidSelector { .. })
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(ParsingError::required_field_missing("title", Some("div.thing")).is_recoverable());
        assert!(ParsingError::detail_view_failed(2, "like-count not found").is_recoverable());
        assert!(!ParsingError::invalid_selector("div[", "unexpected end").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = ParsingError::url_resolution_failed("::", "relative URL without a base", None);
        assert_eq!(err.to_string(), "URL resolution failed: :: - relative URL without a base");
    }
}
