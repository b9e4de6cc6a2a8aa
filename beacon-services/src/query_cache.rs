//! In-memory query result cache, addressed by tag.
//!
//! Results are stored under a tag (the backend resource they were read from,
//! e.g. `orders`) and a key (the query). A change notification for a
//! resource drops every result under its tag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use beacon_socket::CacheInvalidator;

/// A cached query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedQuery {
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

type Entries = HashMap<String, HashMap<String, CachedQuery>>;

#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<Entries>,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a result, replacing any previous one under the same tag and key.
    pub fn insert(&self, tag: &str, key: &str, value: serde_json::Value) {
        self.write().entry(tag.to_string()).or_default().insert(
            key.to_string(),
            CachedQuery {
                value,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, tag: &str, key: &str) -> Option<CachedQuery> {
        self.read().get(tag)?.get(key).cloned()
    }

    /// Drop every result under `tag`. Returns how many were dropped.
    pub fn invalidate(&self, tag: &str) -> usize {
        let removed = self.write().remove(tag).map_or(0, |queries| queries.len());
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!("query cache: invalidated {removed} result(s) tagged {tag}");
        removed
    }

    /// Number of cached results across all tags.
    pub fn len(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags that currently hold at least one result, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, queries)| !queries.is_empty())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// How many invalidations have been applied, including ones that found
    /// nothing cached.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl CacheInvalidator for QueryCache {
    fn invalidate_tag(&self, tag: &str) {
        self.invalidate(tag);
    }
}
