//! TTL + LRU response cache keyed on the normalized prompt hash.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::prompt::TokenUsage;

#[derive(Clone, Debug)]
struct CacheEntry {
    content: String,
    usage: TokenUsage,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Recency order, least recently used at the front.
    order: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|candidate| candidate == key) {
            self.order.remove(position);
        }
        self.order.push_back(key.to_string());
    }
}

pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity, inner: Mutex::new(CacheInner::default()) }
    }

    /// Fresh hit returns the stored content and token counts; an expired
    /// entry is dropped on access.
    pub fn get(&self, key: &str) -> Option<(String, TokenUsage)> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };

        if expired {
            inner.entries.remove(key);
            if let Some(position) = inner.order.iter().position(|candidate| candidate == key) {
                inner.order.remove(position);
            }
            return None;
        }

        inner.touch(key);
        inner.entries.get(key).map(|entry| (entry.content.clone(), entry.usage))
    }

    pub fn put(&self, key: impl Into<String>, content: impl Into<String>, usage: TokenUsage) {
        let key = key.into();
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.entries.insert(
            key.clone(),
            CacheEntry { content: content.into(), usage, inserted_at: Instant::now() },
        );
        inner.touch(&key);

        while inner.entries.len() > self.capacity {
            let Some(evicted) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&evicted);
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ResponseCache;
    use crate::prompt::TokenUsage;

    fn usage() -> TokenUsage {
        TokenUsage { prompt_tokens: 10, completion_tokens: 5 }
    }

    #[test]
    fn hit_returns_stored_completion() {
        let cache = ResponseCache::new(Duration::from_secs(60), 8);
        cache.put("k1", "thirty-five hours", usage());
        let (content, stored) = cache.get("k1").expect("fresh entry");
        assert_eq!(content, "thirty-five hours");
        assert_eq!(stored.prompt_tokens, 10);
    }

    #[test]
    fn expired_entries_are_dropped_on_access() {
        let cache = ResponseCache::new(Duration::from_millis(10), 8);
        cache.put("k1", "stale", usage());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_entry_is_evicted_at_capacity() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.put("a", "1", usage());
        cache.put("b", "2", usage());
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.put("c", "3", usage());

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }
}
