//! In-flight DVR fragment buffer: holds the bytes of segments pending flush
//! or awaiting a read-back (e.g. an admin preview endpoint) so the
//! segmenter doesn't need to re-open the file it just wrote. Adapted from
//! the teacher's HLS segment LRU cache (`http/cache.rs`) with a local,
//! DVR-scoped config instead of the deleted VOD `CacheConfig`.

use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct FragmentCacheConfig {
    pub max_memory_bytes: usize,
    pub max_fragments: usize,
    pub ttl_secs: u64,
}

impl Default for FragmentCacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            max_fragments: 256,
            ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
struct FragmentEntry {
    data: Bytes,
    created_at: SystemTime,
    last_accessed: SystemTime,
}

impl FragmentEntry {
    fn new(data: Bytes) -> Self {
        let now = SystemTime::now();
        Self {
            data,
            created_at: now,
            last_accessed: now,
        }
    }

    fn age_secs(&self) -> u64 {
        self.created_at.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    fn is_expired(&self, ttl_secs: u64) -> bool {
        self.age_secs() > ttl_secs
    }
}

/// Keyed by `stream_url:segment_sequence`.
pub struct FragmentCache {
    entries: DashMap<String, FragmentEntry>,
    memory_bytes: AtomicUsize,
    config: FragmentCacheConfig,
}

impl FragmentCache {
    pub fn new(config: FragmentCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            memory_bytes: AtomicUsize::new(0),
            config,
        }
    }

    pub fn make_key(stream_url: &str, sequence: usize) -> String {
        format!("{stream_url}:{sequence}")
    }

    pub fn get(&self, stream_url: &str, sequence: usize) -> Option<Bytes> {
        let key = Self::make_key(stream_url, sequence);
        self.entries.get_mut(&key).map(|mut e| {
            e.last_accessed = SystemTime::now();
            e.data.clone()
        })
    }

    pub fn insert(&self, stream_url: &str, sequence: usize, data: Bytes) {
        let key = Self::make_key(stream_url, sequence);
        let size = data.len();
        if self.memory_bytes.load(Ordering::Relaxed) + size > self.config.max_memory_bytes
            || self.entries.len() >= self.config.max_fragments
        {
            self.evict_to_fit(size);
        }
        self.entries.insert(key, FragmentEntry::new(data));
        self.memory_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn evict_to_fit(&self, needed: usize) {
        let mut freed = 0;
        self.entries.retain(|_, e| {
            if e.is_expired(self.config.ttl_secs) {
                freed += e.data.len();
                false
            } else {
                true
            }
        });
        self.memory_bytes.fetch_sub(freed, Ordering::Relaxed);

        if self.memory_bytes.load(Ordering::Relaxed) + needed <= self.config.max_memory_bytes
            && self.entries.len() < self.config.max_fragments
        {
            return;
        }
        let mut entries: Vec<_> = self.entries.iter().map(|e| (e.key().clone(), e.value().last_accessed)).collect();
        entries.sort_by_key(|(_, last)| *last);
        let target = self.config.max_memory_bytes / 2;
        let mut freed = 0;
        for (key, _) in entries {
            if freed >= target {
                break;
            }
            if let Some((_, entry)) = self.entries.remove(&key) {
                freed += entry.data.len();
            }
        }
        self.memory_bytes.fetch_sub(freed, Ordering::Relaxed);
    }

    pub fn remove_stream(&self, stream_url: &str) {
        let prefix = format!("{stream_url}:");
        let mut freed = 0;
        self.entries.retain(|key, e| {
            if key.starts_with(&prefix) {
                freed += e.data.len();
                false
            } else {
                true
            }
        });
        self.memory_bytes.fetch_sub(freed, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FragmentCache {
    fn default() -> Self {
        Self::new(FragmentCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let cache = FragmentCache::default();
        cache.insert("v/app/s", 0, Bytes::from_static(b"data"));
        assert_eq!(cache.get("v/app/s", 0), Some(Bytes::from_static(b"data")));
    }

    #[test]
    fn remove_stream_clears_only_that_streams_fragments() {
        let cache = FragmentCache::default();
        cache.insert("v/app/a", 0, Bytes::from_static(b"a0"));
        cache.insert("v/app/a", 1, Bytes::from_static(b"a1"));
        cache.insert("v/app/b", 0, Bytes::from_static(b"b0"));
        cache.remove_stream("v/app/a");
        assert!(cache.get("v/app/a", 0).is_none());
        assert!(cache.get("v/app/b", 0).is_some());
    }

    #[test]
    fn eviction_keeps_cache_within_fragment_count() {
        let cache = FragmentCache::new(FragmentCacheConfig {
            max_memory_bytes: 1024,
            max_fragments: 3,
            ttl_secs: 120,
        });
        for i in 0..10 {
            cache.insert("v/app/s", i, Bytes::from_static(b"x"));
        }
        assert!(cache.len() <= 3);
    }
}
