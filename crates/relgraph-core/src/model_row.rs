//! Raw entity rows with per-column modification tracking.

use std::sync::{Arc, RwLock};

use crate::structure::{EntityId, ModelStructure};
use crate::value::Value;

/// A row shared between the row cache and any instance reading it.
pub type SharedRow = Arc<RwLock<ModelRow>>;

/// One bit per column index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMask {
    words: Vec<u64>,
}

impl ColumnMask {
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    pub fn set(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1 << (index % 64)) != 0)
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Set bit indexes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            (0..64)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}

/// One raw record of one table.
///
/// `values` is sized to the owning structure's column count. A row with no id
/// has never been persisted and always reports itself as modified.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRow {
    entity: EntityId,
    primary_key: usize,
    id: Option<i64>,
    values: Vec<Value>,
    modified: ColumnMask,
}

impl ModelRow {
    /// An empty, unsaved row for `structure`.
    pub fn new(structure: &ModelStructure) -> Self {
        let len = structure.column_count();
        Self {
            entity: structure.id(),
            primary_key: structure.primary_key(),
            id: None,
            values: vec![Value::Null; len],
            modified: ColumnMask::empty(len),
        }
    }

    /// A persisted row as read from the database.
    pub fn loaded(structure: &ModelStructure, id: i64, mut values: Vec<Value>) -> Self {
        let len = structure.column_count();
        values.resize(len, Value::Null);
        values[structure.primary_key()] = Value::BigInt(id);
        Self {
            entity: structure.id(),
            primary_key: structure.primary_key(),
            id: Some(id),
            values,
            modified: ColumnMask::empty(len),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Record the id assigned by the database.
    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
        self.values[self.primary_key] = Value::BigInt(id);
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Write a slot and mark it modified. Returns false, leaving the mask
    /// alone, when the slot already holds `value`.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.values.get_mut(index) {
            Some(slot) if *slot != value => {
                *slot = value;
                self.modified.set(index);
                true
            }
            _ => false,
        }
    }

    /// Overwrite a slot with persisted state, without marking it.
    pub fn assign(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Replace every slot with freshly loaded values.
    pub fn refresh(&mut self, values: Vec<Value>) {
        for (index, value) in values.into_iter().enumerate() {
            if index != self.primary_key {
                self.assign(index, value);
            }
        }
    }

    pub fn is_modified(&self) -> bool {
        self.id.is_none() || self.modified.any()
    }

    pub fn is_column_modified(&self, index: usize) -> bool {
        self.modified.is_set(index)
    }

    /// Modified column indexes in ascending order.
    pub fn modified_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.modified.iter()
    }

    /// Private copy for mutation: same values, clean mask.
    pub fn copy_for_write(&self) -> Self {
        Self {
            modified: ColumnMask::empty(self.values.len()),
            ..self.clone()
        }
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    /// Wrap the row for sharing.
    pub fn into_shared(self) -> SharedRow {
        Arc::new(RwLock::new(self))
    }
}
