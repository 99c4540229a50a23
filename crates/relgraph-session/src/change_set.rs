//! Raw rows and instances written during one unit of work.
//!
//! Nothing reaches the row cache until the unit commits. Publishing then
//! applies, in order: inserted rows (unless deleted again in the same unit),
//! updated rows (unless deleted), and evictions for deleted rows. Instance
//! events are handed back for announcement once the cache is consistent.

use std::collections::{HashMap, HashSet};

use relgraph_core::{EntityId, SharedRow};

use crate::instance::InstanceId;
use crate::row_cache::{RowCache, RowKey};

/// An instance announced to interceptors after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceEvent {
    pub instance: InstanceId,
    pub entity: EntityId,
    pub id: i64,
}

/// Instance events that survived cancellation, in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Published {
    pub updated: Vec<InstanceEvent>,
    pub deleted: Vec<InstanceEvent>,
}

/// Counts of pending raw-row changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    inserted: HashMap<RowKey, SharedRow>,
    updated: HashMap<RowKey, SharedRow>,
    deleted: HashSet<RowKey>,
    saved_instances: Vec<InstanceEvent>,
    deleted_instances: Vec<InstanceEvent>,
}

impl ChangeSet {
    pub fn record_insert(&mut self, key: RowKey, row: SharedRow) {
        self.inserted.insert(key, row);
    }

    pub fn record_update(&mut self, key: RowKey, row: SharedRow) {
        if let Some(inserted) = self.inserted.get_mut(&key) {
            *inserted = row;
        } else {
            self.updated.insert(key, row);
        }
    }

    pub fn record_delete(&mut self, key: RowKey) {
        self.deleted.insert(key);
    }

    pub fn record_saved_instance(&mut self, event: InstanceEvent) {
        if !self.saved_instances.contains(&event) {
            self.saved_instances.push(event);
        }
    }

    pub fn record_deleted_instance(&mut self, event: InstanceEvent) {
        if !self.deleted_instances.contains(&event) {
            self.deleted_instances.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.saved_instances.is_empty()
            && self.deleted_instances.is_empty()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            inserted: self.inserted.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    /// Apply the unit to the row cache.
    pub fn publish(self, cache: &RowCache) -> Published {
        let mut cancelled = 0usize;
        for (key, row) in self.inserted {
            if self.deleted.contains(&key) {
                cancelled += 1;
                continue;
            }
            cache.put(row);
        }
        for (key, row) in self.updated {
            if !self.deleted.contains(&key) {
                cache.put(row);
            }
        }
        for (entity, id) in &self.deleted {
            cache.evict(*entity, *id);
        }
        tracing::debug!(
            deleted = self.deleted.len(),
            cancelled = cancelled,
            "published change set to row cache"
        );

        let deleted: HashSet<InstanceId> =
            self.deleted_instances.iter().map(|e| e.instance).collect();
        Published {
            updated: self
                .saved_instances
                .into_iter()
                .filter(|e| !deleted.contains(&e.instance))
                .collect(),
            deleted: self.deleted_instances,
        }
    }
}
