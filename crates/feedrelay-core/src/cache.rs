//! In-memory last-good payload cache keyed by (source, normalized query).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Stored response payload. Error responses are cached too, under a shorter TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub body: String,
    pub http_status: u16,
    pub content_type: Option<String>,
    /// Delta-seconds `Retry-After` the upstream sent with a 429.
    pub retry_after_secs: Option<u64>,
}

impl CachedPayload {
    pub const fn is_success(&self) -> bool {
        self.http_status >= 200 && self.http_status < 300
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: CachedPayload,
    pub fetched_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// Fresh iff `now - fetched_at < ttl`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.fetched_at_ms) < self.ttl_ms
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.fetched_at_ms)
    }
}

/// Shared cache handle. Clones share the same map; inject one per orchestrator
/// (or per test) rather than reaching for a global.
#[derive(Clone)]
pub struct CacheStore {
    map: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Returns the entry only while it is fresh.
    pub async fn get_fresh(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let map = self.map.read().await;
        map.get(key).filter(|entry| entry.is_fresh(now)).cloned()
    }

    /// Returns the entry regardless of age, for last-resort stale reuse.
    pub async fn get_stale(&self, key: &str) -> Option<CacheEntry> {
        let map = self.map.read().await;
        map.get(key).cloned()
    }

    /// Replaces any existing entry wholesale.
    pub async fn put(&self, key: impl Into<String>, payload: CachedPayload, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at_ms: self.clock.now_ms(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let mut map = self.map.write().await;
        map.insert(key, entry);
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        let mut map = self.map.write().await;
        map.remove(key).is_some()
    }

    pub async fn clear(&self) {
        let mut map = self.map.write().await;
        map.clear();
    }

    /// Number of entries, including stale ones.
    pub async fn len(&self) -> usize {
        let map = self.map.read().await;
        map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Builds a cache key from the source id and its normalized request shape.
///
/// Query text is trimmed and lower-cased; parameters are ordered by name so
/// `{a, b}` and `{b, a}` share an entry.
pub fn cache_key(
    source_id: &str,
    query: Option<&str>,
    params: &BTreeMap<String, String>,
    range: (Option<&str>, Option<&str>),
) -> String {
    let mut key = String::from(source_id);

    if let Some(query) = query.map(normalize_query).filter(|q| !q.is_empty()) {
        key.push_str("|q=");
        key.push_str(&query);
    }

    for (name, value) in params {
        key.push('|');
        key.push_str(name);
        key.push('=');
        key.push_str(value.trim());
    }

    if let Some(start) = range.0 {
        key.push_str("|start=");
        key.push_str(start);
    }
    if let Some(end) = range.1 {
        key.push_str("|end=");
        key.push_str(end);
    }

    key
}

pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
