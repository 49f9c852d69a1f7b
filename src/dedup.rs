//! Bounded per-tenant record of already-notified entries.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::feed::Entry;

/// Normalized dedup key for a feed entry: `<post id>_<author>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Lowercase and trim the id; keep only word characters of the author.
    pub fn new(post_id: &str, author: &str) -> Self {
        let id = post_id.trim().to_lowercase();
        let author: String = author
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .flat_map(char::to_lowercase)
            .collect();
        let author = if author.is_empty() {
            "unknown".to_string()
        } else {
            author
        };
        Self(format!("{id}_{author}"))
    }

    /// Fingerprint of an entry; entries without an id fall back to their link.
    pub fn of(entry: &Entry) -> Self {
        let id = if entry.id.trim().is_empty() {
            &entry.link
        } else {
            &entry.id
        };
        Self::new(id, &entry.author)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insertion-ordered fingerprint set with FIFO eviction.
///
/// Serialized as `{fingerprint: notified_at}` in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupCache {
    entries: IndexMap<String, DateTime<Utc>>,
    #[serde(skip)]
    limit: usize,
}

impl DedupCache {
    /// `limit = 0` disables eviction.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            limit,
        }
    }

    pub fn seen(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint.as_str())
    }

    /// Record a fingerprint, then evict the oldest entries past the bound.
    /// Recording a known fingerprint changes nothing.
    pub fn record(&mut self, fingerprint: &Fingerprint) {
        self.record_at(fingerprint, Utc::now());
    }

    pub fn record_at(&mut self, fingerprint: &Fingerprint, at: DateTime<Utc>) {
        if self.seen(fingerprint) {
            return;
        }
        self.entries.insert(fingerprint.as_str().to_string(), at);
        self.evict();
    }

    /// Change the bound. Eviction happens on the next `record`.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        if self.limit == 0 {
            return;
        }
        let excess = self.entries.len().saturating_sub(self.limit);
        if excess > 0 {
            self.entries.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(s, "author")
    }

    #[test]
    fn evicts_oldest_past_bound() {
        let mut cache = DedupCache::new(2);
        cache.record(&fp("a"));
        cache.record(&fp("b"));
        cache.record(&fp("c"));
        assert!(!cache.seen(&fp("a")));
        assert!(cache.seen(&fp("b")));
        assert!(cache.seen(&fp("c")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn record_is_idempotent() {
        let mut cache = DedupCache::new(10);
        cache.record(&fp("a"));
        cache.record(&fp("a"));
        assert_eq!(cache.len(), 1);
        assert!(cache.seen(&fp("a")));
    }

    #[test]
    fn re_recording_does_not_refresh_position() {
        let mut cache = DedupCache::new(2);
        cache.record(&fp("a"));
        cache.record(&fp("b"));
        cache.record(&fp("a"));
        cache.record(&fp("c"));
        assert!(!cache.seen(&fp("a")));
        assert!(cache.seen(&fp("b")));
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let mut cache = DedupCache::new(0);
        for i in 0..500 {
            cache.record(&fp(&i.to_string()));
        }
        assert_eq!(cache.len(), 500);
    }

    #[test]
    fn lowering_limit_trims_on_next_record() {
        let mut cache = DedupCache::new(0);
        for i in 0..5 {
            cache.record(&fp(&i.to_string()));
        }
        cache.set_limit(2);
        assert_eq!(cache.len(), 5);
        cache.record(&fp("new"));
        assert_eq!(cache.len(), 2);
        assert!(cache.seen(&fp("4")));
        assert!(cache.seen(&fp("new")));
    }

    #[test]
    fn fingerprint_normalizes_id_and_author() {
        let a = Fingerprint::new("  Post-1 ", "Alice Smith!");
        assert_eq!(a.as_str(), "post-1_alicesmith");
        assert_eq!(Fingerprint::new("1", "  ").as_str(), "1_unknown");
        assert_eq!(Fingerprint::new("1", "小明 ").as_str(), "1_小明");
    }

    #[test]
    fn fingerprint_falls_back_to_link() {
        let entry = Entry::new("", "t").with_link("https://x/1").with_author("bob");
        assert_eq!(Fingerprint::of(&entry).as_str(), "https://x/1_bob");
    }

    #[test]
    fn persists_in_insertion_order() {
        let mut cache = DedupCache::new(0);
        cache.record(&fp("b"));
        cache.record(&fp("a"));
        let json = serde_json::to_string(&cache).unwrap();
        assert!(json.find("b_author").unwrap() < json.find("a_author").unwrap());

        let back: DedupCache = serde_json::from_str(&json).unwrap();
        assert!(back.seen(&fp("a")));
        assert_eq!(back.len(), 2);
    }
}
