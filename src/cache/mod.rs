//! # Cache Module
//!
//! Short-lived caching of search results.
//!
//! Repeating a `/play` or `/search` for the same text within the TTL answers
//! from memory instead of spending another YouTube API call or yt-dlp run.
//! Keys are the trimmed, lowercased query.
//!
//! ```env
//! SEARCH_CACHE_TTL=300        # seconds, 0 disables the cache
//! ```

pub mod lru_cache;

use lru_cache::TtlCache;
use std::time::Duration;
use tracing::info;

use crate::sources::SearchHit;

/// Entries kept at most; the oldest is evicted first.
pub const SEARCH_CACHE_CAPACITY: usize = 256;

/// Search results keyed by normalized query.
#[derive(Clone)]
pub struct SearchCache {
    inner: TtlCache<String, Vec<SearchHit>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(SEARCH_CACHE_CAPACITY, ttl),
        }
    }

    pub fn get(&self, query: &str) -> Option<Vec<SearchHit>> {
        self.inner.get(&normalize(query))
    }

    /// Empty result lists are not cached, so a later retry can still succeed.
    pub fn put(&self, query: &str, hits: &[SearchHit]) {
        if !hits.is_empty() {
            self.inner.insert(normalize(query), hits.to_vec());
        }
    }

    /// Periodic maintenance; called from the bot's background task.
    pub fn cleanup_old_entries(&self) {
        let removed = self.inner.cleanup_expired();
        if removed > 0 {
            info!("🧹 Search cache cleanup: removed {} expired entries", removed);
        }
    }
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
