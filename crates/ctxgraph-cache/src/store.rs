use crate::{Artifact, CacheEntry, CacheKey, CacheStats, CacheStore};
use async_trait::async_trait;
use ctxgraph_core::{CacheConfig, Result};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

struct StoreState {
    entries: LruCache<CacheKey, CacheEntry>,
    stats: CacheStats,
}

/// In-process byte-bounded LRU store.
///
/// Eviction runs synchronously at the end of a `put` that pushes the total
/// past capacity. The most recent entry is never evicted by its own `put`,
/// so an artifact larger than the whole capacity survives until the next one.
pub struct MemoryCacheStore {
    capacity_bytes: usize,
    state: Mutex<StoreState>,
}

impl MemoryCacheStore {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity_bytes)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any entry, fresh or stale, is stored under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    fn evict_to_capacity(&self, state: &mut StoreState) {
        while state.stats.size_bytes > self.capacity_bytes && state.entries.len() > 1 {
            match state.entries.pop_lru() {
                Some((key, entry)) => {
                    state.stats.size_bytes -= entry.size_bytes();
                    state.stats.evictions += 1;
                    trace!("Evicted {}", key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut state = self.state.lock();
        let fresh = state.entries.peek(key).map(|e| !e.stale).unwrap_or(false);
        if !fresh {
            state.stats.misses += 1;
            return Ok(None);
        }

        let entry = state.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.clone()
        });
        state.stats.hits += 1;
        Ok(entry)
    }

    async fn put(&self, key: CacheKey, artifact: Artifact) -> Result<()> {
        let entry = CacheEntry::new(key.clone(), artifact);
        let size = entry.size_bytes();

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.pop(&key) {
            state.stats.size_bytes -= previous.size_bytes();
        }
        state.entries.put(key, entry);
        state.stats.size_bytes += size;

        if state.stats.size_bytes > self.capacity_bytes {
            debug!(
                "Cache over capacity ({} > {} bytes), evicting",
                state.stats.size_bytes, self.capacity_bytes
            );
            self.evict_to_capacity(&mut state);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.lock();
        match state.entries.pop(key) {
            Some(entry) => {
                state.stats.size_bytes -= entry.size_bytes();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys_matching(
        &self,
        predicate: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Send + Sync),
    ) -> Result<Vec<CacheKey>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn update_score(&self, key: &CacheKey, score: f64) -> Result<bool> {
        let mut state = self.state.lock();
        match state.entries.peek_mut(key) {
            Some(entry) => {
                entry.relevance_score = score;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_stale(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock();
        match state.entries.peek_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }
}
