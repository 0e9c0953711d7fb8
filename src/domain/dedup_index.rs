//! Per-source duplicate tracking
//!
//! Two layers: identifiers already persisted when the run started, and
//! identifiers accepted during the run. Owned by the run and passed by
//! reference; there is no process-wide set.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    source_key: String,
    persisted: HashSet<String>,
    session: HashSet<String>,
}

impl DedupIndex {
    /// Build from a snapshot of persisted identifiers
    pub fn from_persisted<I>(source_key: impl Into<String>, persisted: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            source_key: source_key.into(),
            persisted: persisted.into_iter().collect(),
            session: HashSet::new(),
        }
    }

    pub fn empty(source_key: impl Into<String>) -> Self {
        Self::from_persisted(source_key, std::iter::empty())
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.persisted.contains(identifier) || self.session.contains(identifier)
    }

    /// Record `identifier` as captured in this run. Callers check
    /// [`contains`](Self::contains) first.
    pub fn accept(&mut self, identifier: impl Into<String>) {
        let identifier = identifier.into();
        debug_assert!(
            !self.persisted.contains(&identifier),
            "accepted an identifier that was already persisted"
        );
        self.session.insert(identifier);
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }

    pub fn session_len(&self) -> usize {
        self.session.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_checks_both_layers() {
        let mut index = DedupIndex::from_persisted(
            "listing:nosleep",
            vec!["https://a/1".to_string(), "https://a/2".to_string()],
        );
        assert!(index.contains("https://a/1"));
        assert!(!index.contains("https://a/3"));

        index.accept("https://a/3");
        assert!(index.contains("https://a/3"));
        assert_eq!(index.persisted_len(), 2);
        assert_eq!(index.session_len(), 1);
    }

    #[test]
    fn test_indices_do_not_share_state() {
        let mut first = DedupIndex::empty("listing:a");
        let second = DedupIndex::empty("listing:b");
        first.accept("https://x/1");
        assert!(first.contains("https://x/1"));
        assert!(!second.contains("https://x/1"));
    }
}
