use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Bounded LRU over exact text -> vector. Entries are immutable once
/// written, so a stale read is indistinguishable from a fresh one.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
    stats: Mutex<CacheStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock().unwrap();
        let hit = entries.get(text).cloned();
        let mut stats = self.stats.lock().unwrap();
        match hit {
            Some(vector) => {
                stats.hits += 1;
                Some(vector)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, text: String, vector: Vec<f32>) {
        self.entries.lock().unwrap().put(text, vector);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }
}
