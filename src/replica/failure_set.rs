//! Per-request failed replica set

use std::collections::HashSet;

/// Endpoints that failed during one logical request.
///
/// Never shared between requests; dropped with the request.
#[derive(Debug, Default, Clone)]
pub struct RequestFailureSet {
    failed: HashSet<String>,
}

impl RequestFailureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns true if the endpoint was not already present.
    pub fn insert(&mut self, uri: &str) -> bool {
        self.failed.insert(uri.to_string())
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.failed.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_deduplicated() {
        let mut set = RequestFailureSet::new();
        assert!(set.is_empty());
        assert!(set.insert("a"));
        assert!(!set.insert("a"));
        assert!(set.insert("b"));
        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(!set.contains("c"));
    }
}
