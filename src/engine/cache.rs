use crate::core::Stone;
use crate::engine::candidate::MoveCandidate;
use std::collections::{BTreeMap, HashMap};

/// 収束済みの解析結果
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub player: Stone,
    pub candidates: Vec<MoveCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

/// 盤面ハッシュをキーにした LRU キャッシュ。
///
/// Entries are written once and never updated: a hash fully determines the
/// position, so a stored answer cannot go stale.
pub struct ResultCache {
    entries: HashMap<u64, Slot>,
    // last_used -> key, oldest first
    recency: BTreeMap<u64, u64>,
    capacity: usize,
    clock: u64,
    hits: u64,
    misses: u64,
    threshold: u64,
}

impl ResultCache {
    pub fn new(capacity: usize, confidence_threshold: u64) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            hits: 0,
            misses: 0,
            threshold: confidence_threshold,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, hash: u64) -> Option<&CacheEntry> {
        let now = self.tick();
        match self.entries.get_mut(&hash) {
            Some(slot) => {
                self.hits += 1;
                self.recency.remove(&slot.last_used);
                slot.last_used = now;
                self.recency.insert(now, hash);
                Some(&slot.entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Lookup without touching counters or recency.
    pub fn contains(&self, hash: u64) -> bool {
        self.entries.contains_key(&hash)
    }

    /// Top candidate has strictly more visits than the threshold.
    pub fn should_cache(&self, candidates: &[MoveCandidate]) -> bool {
        candidates
            .first()
            .is_some_and(|top| top.visits > self.threshold)
    }

    /// Stores `entry` if the key is new and the result is confident enough.
    /// Returns whether an insert happened.
    pub fn put(&mut self, hash: u64, entry: CacheEntry) -> bool {
        if self.entries.contains_key(&hash) || !self.should_cache(&entry.candidates) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let now = self.tick();
        self.recency.insert(now, hash);
        self.entries.insert(
            hash,
            Slot {
                entry,
                last_used: now,
            },
        );
        true
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            capacity: self.capacity,
            hit_rate: self.hit_rate(),
        }
    }
}
