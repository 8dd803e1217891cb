use std::num::NonZeroUsize;

use kibitz_types::{board::Side, Result};
use lru::LruCache;
use serde::Serialize;

use crate::position_error;

/// Board state derived from one scraped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fen: String,
    /// Position the move list starts from; `None` for placement pages.
    pub start_fen: Option<String>,
    /// Moves from `start_fen` in coordinate notation.
    pub moves: Vec<String>,
}

impl CacheEntry {
    pub fn mover(&self) -> Option<Side> {
        Side::from_fen(&self.fen)
    }
}

/// Least-recently-used map from scraped text to resolved positions. Lookups
/// refresh recency.
pub struct PositionCache {
    entries: LruCache<String, CacheEntry>,
}

impl PositionCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| position_error("position cache capacity must be at least 1"))?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }

    pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Looks up without touching recency.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry) {
        self.entries.put(key.into(), entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
