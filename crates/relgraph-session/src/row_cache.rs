//! The process-wide row cache.
//!
//! Maps `(entity level, primary key)` to the one shared [`ModelRow`] for that
//! record. Instances hold clones of the same `Arc`, so two loads of one id
//! inside the retention window observe the same row.
//!
//! Retention is bounded per entity. When an entity exceeds its capacity the
//! least recently used row of that entity is dropped from the cache; any
//! instance still holding it keeps a valid, detached copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use relgraph_core::{EntityId, ModelRow, SharedRow};

use crate::config::RowCacheConfig;

/// Cache key: the table level a row belongs to and its primary key.
pub type RowKey = (EntityId, i64);

#[derive(Debug)]
struct CacheEntry {
    row: SharedRow,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    rows: HashMap<RowKey, CacheEntry>,
    /// Per entity, the ids it retains keyed by last use; the first key is
    /// the least recently used.
    recency: HashMap<EntityId, BTreeMap<u64, i64>>,
    tick: u64,
}

impl CacheState {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn retained(&self, entity: EntityId) -> usize {
        self.recency.get(&entity).map_or(0, BTreeMap::len)
    }

    /// Mark a retained row as used at `tick` and return it.
    fn use_entry(&mut self, key: RowKey, tick: u64) -> Option<&mut CacheEntry> {
        let entry = self.rows.get_mut(&key)?;
        let previous = std::mem::replace(&mut entry.last_used, tick);
        if let Some(order) = self.recency.get_mut(&key.0) {
            order.remove(&previous);
            order.insert(tick, key.1);
        }
        Some(entry)
    }

    fn insert(&mut self, key: RowKey, row: SharedRow, tick: u64) {
        self.rows.insert(
            key,
            CacheEntry {
                row,
                last_used: tick,
            },
        );
        self.recency.entry(key.0).or_default().insert(tick, key.1);
    }

    fn remove(&mut self, key: &RowKey) -> bool {
        let Some(entry) = self.rows.remove(key) else {
            return false;
        };
        if let Some(order) = self.recency.get_mut(&key.0) {
            order.remove(&entry.last_used);
            if order.is_empty() {
                self.recency.remove(&key.0);
            }
        }
        true
    }

    /// Evict the least-recently-used row of `entity`.
    fn evict_lru(&mut self, entity: EntityId) -> bool {
        let lru = self
            .recency
            .get(&entity)
            .and_then(|order| order.first_key_value())
            .map(|(_, id)| (entity, *id));
        match lru {
            Some(key) => self.remove(&key),
            None => false,
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.recency.clear();
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Rows currently retained
    pub len: usize,
}

#[derive(Debug)]
pub struct RowCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for RowCache {
    fn default() -> Self {
        Self::new(&RowCacheConfig::default())
    }
}

impl RowCache {
    pub fn new(config: &RowCacheConfig) -> Self {
        Self::with_capacity(config.capacity_per_entity)
    }

    pub fn with_capacity(capacity_per_entity: usize) -> Self {
        Self {
            capacity: capacity_per_entity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity_per_entity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a retained row.
    pub fn get(&self, entity: EntityId, id: i64) -> Option<SharedRow> {
        let mut state = self.lock();
        let tick = state.touch();
        match state.use_entry((entity, id), tick) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.row))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Return the retained row for `(entity, id)`, or retain the row built by
    /// `make`.
    ///
    /// The flag is true when `make` ran. Two callers racing on the same key
    /// both get the row that won; the loser's row is dropped.
    pub fn get_or_insert(
        &self,
        entity: EntityId,
        id: i64,
        make: impl FnOnce() -> ModelRow,
    ) -> (SharedRow, bool) {
        let mut state = self.lock();
        let tick = state.touch();
        if let Some(entry) = state.use_entry((entity, id), tick) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (Arc::clone(&entry.row), false);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let row = make().into_shared();
        self.retain(&mut state, (entity, id), Arc::clone(&row), tick);
        (row, true)
    }

    /// Retain `row` under its own entity and id, replacing any previous row.
    /// Rows without an id are ignored.
    pub fn put(&self, row: SharedRow) {
        let key = {
            let guard = row.read().unwrap_or_else(PoisonError::into_inner);
            match guard.id() {
                Some(id) => (guard.entity(), id),
                None => return,
            }
        };
        let mut state = self.lock();
        let tick = state.touch();
        if let Some(entry) = state.use_entry(key, tick) {
            entry.row = row;
            return;
        }
        self.retain(&mut state, key, row, tick);
    }

    fn retain(&self, state: &mut CacheState, key: RowKey, row: SharedRow, tick: u64) {
        if self.capacity == 0 {
            return;
        }
        if state.retained(key.0) >= self.capacity && state.evict_lru(key.0) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(entity = %key.0, capacity = self.capacity, "row cache eviction");
        }
        state.insert(key, row, tick);
    }

    /// Drop a row from the cache. Returns whether it was retained.
    pub fn evict(&self, entity: EntityId, id: i64) -> bool {
        self.lock().remove(&(entity, id))
    }

    pub fn contains(&self, entity: EntityId, id: i64) -> bool {
        self.lock().rows.contains_key(&(entity, id))
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}
