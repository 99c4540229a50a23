//! Turning flat result rows back into an instance graph.
//!
//! Every compiled node contributes one or more column blocks, each starting
//! with a primary key. A NULL key means the LEFT JOIN found no row for that
//! block. Rows belonging to one primary entity are contiguous, so a change of
//! the primary key ends the current logical record.

use std::collections::HashSet;
use std::sync::PoisonError;

use relgraph_core::{ModelRegistry, ModelRow, RelationKind, Result, Row, Value};
use relgraph_query::{CompiledNode, CompiledQuery, ProjectionBlock};

use crate::instance::{Arena, InstanceId, ModelInstance, RelationalData};
use crate::row_cache::RowCache;

pub struct Materializer<'a> {
    registry: &'a ModelRegistry,
    cache: &'a RowCache,
    query: &'a CompiledQuery,
    rows: &'a [Row],
    position: usize,
    lock_loaded: bool,
    /// Collections already cleared during this scan
    reset: HashSet<(InstanceId, String)>,
}

impl<'a> Materializer<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        cache: &'a RowCache,
        query: &'a CompiledQuery,
        rows: &'a [Row],
    ) -> Self {
        Self {
            registry,
            cache,
            query,
            rows,
            position: 0,
            lock_loaded: false,
            reset: HashSet::new(),
        }
    }

    /// Lock every instance this materializer creates.
    pub fn lock_loaded(mut self, lock: bool) -> Self {
        self.lock_loaded = lock;
        self
    }

    /// Index of the next unread row.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Materialize the next logical record and return its primary instance.
    ///
    /// Reads rows until the primary key changes; the next call resumes at the
    /// first row of the following record.
    pub fn next_record(&mut self, arena: &mut Arena) -> Result<Option<InstanceId>> {
        let (query, rows) = (self.query, self.rows);
        let Some(root) = query.layout().first() else {
            return Ok(None);
        };
        let Some(key_offset) = root.identity_block().map(|b| b.offset) else {
            return Ok(None);
        };

        let mut record = None;
        let mut current_key = None;
        while let Some(row) = rows.get(self.position) {
            let key = row.get(key_offset).and_then(Value::as_i64);
            if record.is_some() && key != current_key {
                break;
            }
            current_key = key;
            let instances = self.read_row(arena, row);
            if record.is_none() {
                record = instances.first().copied().flatten();
            }
            self.position += 1;
        }
        Ok(record)
    }

    /// Hydrate every node of one physical row and wire up its relations.
    fn read_row(&mut self, arena: &mut Arena, row: &Row) -> Vec<Option<InstanceId>> {
        let query = self.query;
        let layout = query.layout();
        let mut instances: Vec<Option<InstanceId>> = Vec::with_capacity(layout.len());
        for node in layout {
            let instance = self.hydrate(arena, node, row);
            instances.push(instance);
            if let (Some(parent), Some(relation)) = (node.parent, node.relation.as_deref()) {
                if let Some(owner) = instances[parent] {
                    self.attach(arena, owner, relation, instance);
                }
            }
        }
        instances
    }

    fn hydrate(&self, arena: &mut Arena, node: &CompiledNode, row: &Row) -> Option<InstanceId> {
        let identity = node.identity_block()?;
        let id = row.get(identity.offset).and_then(Value::as_i64)?;

        let handle = match arena.lookup(node.entity, id) {
            Some(handle) => handle,
            None => {
                let mut instance = ModelInstance::unloaded(self.registry, node.entity);
                instance.locked = self.lock_loaded;
                let handle = arena.push(instance);
                arena.identities.insert((node.entity, id), handle);
                handle
            }
        };

        for block in &node.blocks {
            self.load_block(arena, handle, block, row);
        }
        Some(handle)
    }

    fn load_block(&self, arena: &mut Arena, handle: InstanceId, block: &ProjectionBlock, row: &Row) {
        let Some(block_id) = row.get(block.offset).and_then(Value::as_i64) else {
            return;
        };
        let Some(instance) = arena.get_mut(handle) else {
            return;
        };
        let Some(slot) = instance.slot_of(block.entity) else {
            return;
        };
        if let Some(existing) = instance.row(slot) {
            if existing
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_modified()
            {
                // Unsaved in-memory edits win over what the database returned.
                return;
            }
        }

        let structure = self.registry.structure(block.entity);
        let mut values = vec![Value::Null; structure.column_count()];
        for (k, &column) in block.columns.iter().enumerate() {
            let raw = row.get(block.offset + k).cloned().unwrap_or(Value::Null);
            let descriptor = &structure.columns()[column];
            values[column] = descriptor.column_type.decode(&descriptor.name, raw);
        }

        let mut fresh = Some(values);
        let (shared, made) = self.cache.get_or_insert(block.entity, block_id, || {
            ModelRow::loaded(structure, block_id, fresh.take().unwrap_or_default())
        });
        if !made {
            if let Some(values) = fresh {
                let mut cached = shared.write().unwrap_or_else(PoisonError::into_inner);
                if !cached.is_modified() {
                    cached.refresh(values);
                }
            }
        }
        instance.rows[slot] = Some(shared);
    }

    fn attach(&mut self, arena: &mut Arena, owner: InstanceId, relation: &str, target: Option<InstanceId>) {
        let Some(entity) = arena.get(owner).map(ModelInstance::entity) else {
            return;
        };
        let Some(descriptor) = self.registry.find_relation(entity, relation) else {
            return;
        };
        let is_reference = matches!(descriptor.kind, RelationKind::Reference { .. });
        let first_visit = self.reset.insert((owner, relation.to_string()));
        let Some(state) = arena.get_mut(owner) else {
            return;
        };

        if is_reference {
            // A pending assignment is not overwritten by what was loaded.
            let pending = matches!(
                state.relations.get(relation),
                Some(RelationalData::Reference { dirty: true, .. })
            );
            if !pending {
                state.relations.insert(
                    relation.to_string(),
                    RelationalData::Reference {
                        target,
                        dirty: false,
                    },
                );
            }
            return;
        }

        let data = state
            .relations
            .entry(relation.to_string())
            .or_insert_with(RelationalData::empty_collection);
        if let RelationalData::Collection {
            existing,
            added,
            removed,
        } = data
        {
            if first_visit {
                existing.clear();
            }
            if let Some(target) = target {
                if !existing.contains(&target) && !added.contains(&target) && !removed.contains(&target) {
                    existing.push(target);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_core::{Column, ColumnType, EntityDescriptor, EntityId};
    use relgraph_query::{CompileOptions, Join, Query};
    use std::sync::Arc;

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .entity(
                EntityDescriptor::new("Team", "team")
                    .column(Column::primary("id"))
                    .column(Column::new("name", ColumnType::Text))
                    .children("members", "Hero", "team_id"),
            )
            .entity(
                EntityDescriptor::new("Hero", "hero")
                    .column(Column::primary("id"))
                    .column(Column::new("alias", ColumnType::Text))
                    .column(Column::reference("team_id", "Team"))
                    .column(Column::new("active", ColumnType::Boolean))
                    .reference("team", "team_id"),
            )
            .build()
            .unwrap()
    }

    fn team_with_members(registry: &ModelRegistry) -> Arc<CompiledQuery> {
        let team = registry.entity_id("Team").unwrap();
        Query::new(team)
            .join(Join::new("members"))
            .compile(registry, &CompileOptions::default())
            .unwrap()
    }

    // team: id, name | hero: id, alias, team_id, active
    fn row(team: i64, name: &str, hero: Option<(i64, &str)>) -> Row {
        let names = ["id", "name", "id", "alias", "team_id", "active"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (hero_id, alias, team_id, active) = match hero {
            Some((id, alias)) => (Value::BigInt(id), Value::from(alias), Value::BigInt(team), Value::Int(1)),
            None => (Value::Null, Value::Null, Value::Null, Value::Null),
        };
        Row::new(
            names,
            vec![Value::BigInt(team), name.into(), hero_id, alias, team_id, active],
        )
    }

    fn members(arena: &Arena, team: InstanceId) -> Vec<InstanceId> {
        arena.get(team).unwrap().relation("members").unwrap().members()
    }

    #[test]
    fn test_primary_key_change_ends_a_record() {
        let registry = registry();
        let cache = RowCache::with_capacity(100);
        let query = team_with_members(&registry);
        let rows = vec![
            row(1, "Red", Some((10, "a"))),
            row(1, "Red", Some((11, "b"))),
            row(2, "Blue", None),
        ];
        let mut arena = Arena::default();
        let mut materializer = Materializer::new(&registry, &cache, &query, &rows);

        let red = materializer.next_record(&mut arena).unwrap().unwrap();
        assert_eq!(materializer.position(), 2);
        let blue = materializer.next_record(&mut arena).unwrap().unwrap();
        assert!(materializer.next_record(&mut arena).unwrap().is_none());

        assert_eq!(members(&arena, red).len(), 2);
        assert!(members(&arena, blue).is_empty());
        assert_eq!(arena.len(), 4);

        let hero = members(&arena, red)[0];
        let state = arena.get(hero).unwrap();
        // Booleans arrive from SQLite as integers and are decoded by column type.
        assert_eq!(state.value(0, 3), Value::Bool(true));
        assert_eq!(state.id(), Some(10));
    }

    #[test]
    fn test_loaded_rows_are_shared_with_the_cache() {
        let registry = registry();
        let cache = RowCache::with_capacity(100);
        let query = team_with_members(&registry);
        let rows = vec![row(1, "Red", Some((10, "a")))];

        let mut first = Arena::default();
        let mut second = Arena::default();
        let a = Materializer::new(&registry, &cache, &query, &rows)
            .next_record(&mut first)
            .unwrap()
            .unwrap();
        let b = Materializer::new(&registry, &cache, &query, &rows)
            .next_record(&mut second)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(
            first.get(a).unwrap().row(0).unwrap(),
            second.get(b).unwrap().row(0).unwrap()
        ));
    }

    #[test]
    fn test_modified_rows_are_not_overwritten() {
        let registry = registry();
        let cache = RowCache::with_capacity(100);
        let query = team_with_members(&registry);
        let rows = vec![row(1, "Red", None)];
        let mut arena = Arena::default();

        let team = Materializer::new(&registry, &cache, &query, &rows)
            .next_record(&mut arena)
            .unwrap()
            .unwrap();
        arena
            .get_mut(team)
            .unwrap()
            .write(&registry, 0, 1, "Edited".into());

        let again = Materializer::new(&registry, &cache, &query, &rows)
            .next_record(&mut arena)
            .unwrap()
            .unwrap();
        assert_eq!(again, team);
        assert_eq!(arena.get(team).unwrap().value(0, 1), Value::Text("Edited".into()));
        let cached = cache.get(registry.entity_id("Team").unwrap(), 1).unwrap();
        assert_eq!(cached.read().unwrap().get(1), Some(&Value::Text("Red".into())));
    }

    #[test]
    fn test_reference_join_and_lock() {
        let registry = registry();
        let cache = RowCache::with_capacity(100);
        let hero: EntityId = registry.entity_id("Hero").unwrap();
        let query = Query::new(hero)
            .join(Join::new("team"))
            .compile(&registry, &CompileOptions::default())
            .unwrap();
        // hero: id, alias, team_id, active | team: id, name
        let rows = vec![Row::new(
            vec!["id".into(), "alias".into(), "team_id".into(), "active".into(), "id".into(), "name".into()],
            vec![
                Value::BigInt(5),
                "x".into(),
                Value::Null,
                Value::Int(0),
                Value::Null,
                Value::Null,
            ],
        )];
        let mut arena = Arena::default();
        let handle = Materializer::new(&registry, &cache, &query, &rows)
            .lock_loaded(true)
            .next_record(&mut arena)
            .unwrap()
            .unwrap();
        let state = arena.get(handle).unwrap();
        assert!(state.is_locked());
        assert_eq!(
            state.relation("team"),
            Some(&RelationalData::Reference {
                target: None,
                dirty: false
            })
        );
    }
}
