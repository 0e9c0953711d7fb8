//! Promotional/spam rejection by block-list
//!
//! Matching is a case-insensitive substring test on the candidate title.

/// Compiled block-list. Terms are lowercased once at construction.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    terms: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    /// Returns the first block-list term found in `title`
    pub fn matched_term(&self, title: &str) -> Option<&str> {
        let lowered = title.to_lowercase();
        self.terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }

    pub fn is_spam(&self, title: &str) -> bool {
        self.matched_term(title).is_some()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

/// One-shot form of [`ContentFilter::is_spam`]
pub fn is_spam<S: AsRef<str>>(title: &str, blocklist: &[S]) -> bool {
    let lowered = title.to_lowercase();
    blocklist
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .any(|term| !term.is_empty() && lowered.contains(&term))
}
