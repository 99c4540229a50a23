//! Model instances and the per-session arena that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::PoisonError;

use relgraph_core::{EntityId, ModelRegistry, ModelRow, SharedRow, Value};

/// Handle to an instance inside one session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Materialized state of one relation on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationalData {
    /// A single-valued reference. `dirty` marks a target assigned since the
    /// last save that has not been stamped into the reference column yet.
    Reference {
        target: Option<InstanceId>,
        dirty: bool,
    },
    /// A collection: entities already persisted in the relation, entities
    /// added since the last save and entities removed since the last save.
    Collection {
        existing: Vec<InstanceId>,
        added: Vec<InstanceId>,
        removed: Vec<InstanceId>,
    },
}

impl RelationalData {
    pub(crate) fn empty_collection() -> Self {
        RelationalData::Collection {
            existing: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Whether saving the owner has work to do for this relation.
    pub fn is_dirty(&self) -> bool {
        match self {
            RelationalData::Reference { dirty, .. } => *dirty,
            RelationalData::Collection { added, removed, .. } => {
                !added.is_empty() || !removed.is_empty()
            }
        }
    }

    /// Current members: the reference target, or existing then added.
    pub fn members(&self) -> Vec<InstanceId> {
        match self {
            RelationalData::Reference { target, .. } => target.iter().copied().collect(),
            RelationalData::Collection {
                existing, added, ..
            } => existing.iter().chain(added).copied().collect(),
        }
    }
}

/// The object-level handle over one entity.
///
/// `rows` follows the entity's table layout: one slot per inheritance level,
/// root first, then one per implementation table. A slot holds either the
/// row shared with the row cache or, after the first write, a private copy.
#[derive(Debug)]
pub struct ModelInstance {
    pub(crate) entity: EntityId,
    pub(crate) layout: Vec<EntityId>,
    pub(crate) level_count: usize,
    pub(crate) rows: Vec<Option<SharedRow>>,
    pub(crate) locked: bool,
    pub(crate) saving: bool,
    pub(crate) deleted: bool,
    pub(crate) relations: HashMap<String, RelationalData>,
}

impl ModelInstance {
    /// A new, unsaved instance with an empty row for every level.
    pub(crate) fn new(registry: &ModelRegistry, entity: EntityId) -> Self {
        let mut instance = Self::unloaded(registry, entity);
        for slot in 0..instance.level_count {
            let structure = registry.structure(instance.layout[slot]);
            instance.rows[slot] = Some(ModelRow::new(structure).into_shared());
        }
        instance
    }

    /// An instance with every slot unset, to be filled from loaded rows.
    pub(crate) fn unloaded(registry: &ModelRegistry, entity: EntityId) -> Self {
        let layout = registry.table_layout(entity);
        let level_count = registry.structure(entity).parents().len() + 1;
        Self {
            entity,
            rows: vec![None; layout.len()],
            layout,
            level_count,
            locked: false,
            saving: false,
            deleted: false,
            relations: HashMap::new(),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Slot index of the entity's own table.
    pub(crate) fn leaf_slot(&self) -> usize {
        self.level_count - 1
    }

    pub(crate) fn slot_of(&self, table: EntityId) -> Option<usize> {
        self.layout.iter().position(|t| *t == table)
    }

    pub(crate) fn row(&self, slot: usize) -> Option<&SharedRow> {
        self.rows.get(slot).and_then(Option::as_ref)
    }

    /// The row currently backing `table`, if loaded.
    pub fn row_for(&self, table: EntityId) -> Option<SharedRow> {
        self.slot_of(table).and_then(|slot| self.row(slot)).cloned()
    }

    /// Primary key, once the entity's own row has been persisted.
    pub fn id(&self) -> Option<i64> {
        self.row(self.leaf_slot()).and_then(|row| {
            row.read()
                .unwrap_or_else(PoisonError::into_inner)
                .id()
        })
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub(crate) fn value(&self, slot: usize, column: usize) -> Value {
        self.row(slot)
            .and_then(|row| {
                row.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(column)
                    .cloned()
            })
            .unwrap_or(Value::Null)
    }

    pub(crate) fn has_modified_rows(&self) -> bool {
        self.rows.iter().flatten().any(|row| {
            row.read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_modified()
        })
    }

    /// Whether a save would write anything.
    pub fn has_changes(&self) -> bool {
        self.has_modified_rows() || self.relations.values().any(RelationalData::is_dirty)
    }

    /// Write one slot with copy-on-write: a clean row (possibly shared with
    /// the cache) is replaced by a private copy before the first change.
    /// Returns whether the slot changed.
    pub(crate) fn write(
        &mut self,
        registry: &ModelRegistry,
        slot: usize,
        column: usize,
        value: Value,
    ) -> bool {
        let row = match &self.rows[slot] {
            Some(row) => row.clone(),
            None => {
                let row = ModelRow::new(registry.structure(self.layout[slot])).into_shared();
                self.rows[slot] = Some(row.clone());
                row
            }
        };

        let mut guard = row.write().unwrap_or_else(PoisonError::into_inner);
        if guard.get(column) == Some(&value) {
            return false;
        }
        if guard.is_modified() {
            return guard.set(column, value);
        }
        let mut copy = guard.copy_for_write();
        drop(guard);
        let changed = copy.set(column, value);
        self.rows[slot] = Some(copy.into_shared());
        changed
    }

    pub(crate) fn clear_modified(&self) {
        for row in self.rows.iter().flatten() {
            row.write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear_modified();
        }
    }

    pub fn relation(&self, name: &str) -> Option<&RelationalData> {
        self.relations.get(name)
    }
}

/// Instances of one session, with the `(entity, id)` identity map that makes
/// two paths to the same entity converge on one instance.
#[derive(Debug, Default)]
pub struct Arena {
    pub(crate) instances: Vec<ModelInstance>,
    pub(crate) identities: HashMap<(EntityId, i64), InstanceId>,
}

impl Arena {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, id: InstanceId) -> Option<&ModelInstance> {
        self.instances.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut ModelInstance> {
        self.instances.get_mut(id.0)
    }

    pub fn lookup(&self, entity: EntityId, id: i64) -> Option<InstanceId> {
        self.identities.get(&(entity, id)).copied()
    }

    pub(crate) fn push(&mut self, instance: ModelInstance) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(instance);
        id
    }

    /// Register a persisted instance under its id.
    pub(crate) fn remember(&mut self, instance: InstanceId) {
        if let Some(state) = self.instances.get(instance.0) {
            if let Some(id) = state.id() {
                self.identities.insert((state.entity, id), instance);
            }
        }
    }

    pub(crate) fn forget(&mut self, entity: EntityId, id: i64) {
        self.identities.remove(&(entity, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_core::{Column, ColumnType, EntityDescriptor};
    use std::sync::Arc;

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .entity(
                EntityDescriptor::new("Person", "person")
                    .column(Column::primary("id"))
                    .column(Column::new("name", ColumnType::Text)),
            )
            .entity(
                EntityDescriptor::new("Hero", "hero")
                    .column(Column::primary("id"))
                    .column(Column::new("alias", ColumnType::Text))
                    .column(Column::reference("profile_id", "Profile"))
                    .parent("Person")
                    .implementation("Profile", "profile_id"),
            )
            .entity(
                EntityDescriptor::new("Profile", "profile")
                    .column(Column::primary("id"))
                    .column(Column::new("bio", ColumnType::Text)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_instance_layout() {
        let registry = registry();
        let hero = registry.entity_id("Hero").unwrap();
        let instance = ModelInstance::new(&registry, hero);
        assert_eq!(instance.layout.len(), 3);
        assert_eq!(instance.level_count, 2);
        assert!(instance.row(0).is_some());
        assert!(instance.row(1).is_some());
        assert!(instance.row(2).is_none());
        assert!(instance.is_new());
        assert!(instance.has_changes());
    }

    #[test]
    fn test_write_copies_clean_shared_rows() {
        let registry = registry();
        let person = registry.entity_id("Person").unwrap();
        let structure = registry.structure(person);
        let shared = ModelRow::loaded(structure, 4, vec![Value::Null, "Ann".into()]).into_shared();

        let mut instance = ModelInstance::unloaded(&registry, person);
        instance.rows[0] = Some(Arc::clone(&shared));
        assert!(!instance.has_changes());

        assert!(!instance.write(&registry, 0, 1, "Ann".into()));
        assert!(Arc::ptr_eq(instance.row(0).unwrap(), &shared));

        assert!(instance.write(&registry, 0, 1, "Bea".into()));
        assert!(!Arc::ptr_eq(instance.row(0).unwrap(), &shared));
        assert_eq!(shared.read().unwrap().get(1), Some(&Value::Text("Ann".into())));
        assert_eq!(instance.value(0, 1), Value::Text("Bea".into()));

        // Further writes go to the private copy.
        let private = Arc::clone(instance.row(0).unwrap());
        assert!(instance.write(&registry, 0, 1, "Cy".into()));
        assert!(Arc::ptr_eq(instance.row(0).unwrap(), &private));
    }

    #[test]
    fn test_write_creates_missing_implementation_row() {
        let registry = registry();
        let hero = registry.entity_id("Hero").unwrap();
        let mut instance = ModelInstance::new(&registry, hero);
        assert!(instance.write(&registry, 2, 1, "flies".into()));
        assert!(instance.row(2).is_some());
        assert_eq!(instance.value(2, 1), Value::Text("flies".into()));
    }

    #[test]
    fn test_relational_data_dirtiness() {
        let reference = RelationalData::Reference {
            target: Some(InstanceId(3)),
            dirty: false,
        };
        assert!(!reference.is_dirty());
        assert_eq!(reference.members(), vec![InstanceId(3)]);

        let mut collection = RelationalData::empty_collection();
        assert!(!collection.is_dirty());
        if let RelationalData::Collection { added, existing, .. } = &mut collection {
            existing.push(InstanceId(1));
            added.push(InstanceId(2));
        }
        assert!(collection.is_dirty());
        assert_eq!(collection.members(), vec![InstanceId(1), InstanceId(2)]);
    }

    #[test]
    fn test_arena_identity() {
        let registry = registry();
        let person = registry.entity_id("Person").unwrap();
        let mut arena = Arena::default();
        let mut instance = ModelInstance::new(&registry, person);
        instance.rows[0]
            .as_ref()
            .unwrap()
            .write()
            .unwrap()
            .set_id(9);
        let handle = arena.push(instance);
        arena.remember(handle);
        assert_eq!(arena.lookup(person, 9), Some(handle));
        arena.forget(person, 9);
        assert_eq!(arena.lookup(person, 9), None);
    }
}
