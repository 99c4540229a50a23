//! Cascading save and delete.
//!
//! Saving one instance writes, in order:
//!
//! 1. referenced instances, stamping their ids into reference columns
//! 2. implementation rows, stamping their ids into link columns
//! 3. inheritance levels root first, the root's generated id reused below it
//! 4. collection members, with back references or association rows
//!
//! An instance already being saved further up the cascade is skipped, which
//! is what terminates cycles. Work that cannot happen yet (a reference to a
//! new instance still mid-save, a back reference on an instance already
//! written) is deferred and replayed once the outermost save has run.
//! In-memory dirty state is cleared only after every stage succeeded.

use std::sync::{Arc, PoisonError};

use relgraph_core::{
    EntityId, Error, RelationKind, Result, SessionErrorKind, SharedRow, Transport, Value,
};

use crate::change_set::InstanceEvent;
use crate::instance::{InstanceId, RelationalData};
use crate::statements;
use crate::Session;

/// Work postponed until the outermost save returns.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Deferred {
    /// Save the instance again; a reference it holds could not be stamped.
    Resave(InstanceId),
    /// Write `value` into a column of an instance that was mid-save.
    Stamp {
        instance: InstanceId,
        table: EntityId,
        column: usize,
        value: Value,
    },
}

/// Collection bookkeeping applied once the owner's save succeeded.
struct Settled {
    relation: String,
    linked: Vec<InstanceId>,
    pending: Vec<InstanceId>,
}

impl<T: Transport> Session<T> {
    /// Save an instance and everything reachable from it that changed.
    ///
    /// Returns `false` when there was nothing to write. Opens a transaction
    /// when `auto_begin` is set; without one the change set is published as
    /// soon as the cascade finishes.
    #[tracing::instrument(level = "debug", skip(self), fields(instance = %handle))]
    pub fn save(&mut self, handle: InstanceId) -> Result<bool> {
        let state = self.instance(handle)?;
        if state.deleted {
            return Err(Error::session(
                SessionErrorKind::NotPersisted,
                format!("instance {} was deleted", handle),
            ));
        }
        if !state.has_changes() {
            tracing::debug!("nothing to save");
            return Ok(false);
        }

        self.begin_unit()?;
        let result = self.save_with_deferred(handle);
        if result.is_err() {
            self.deferred.clear();
        }
        let written = result?;
        self.end_unit();
        Ok(written)
    }

    fn save_with_deferred(&mut self, handle: InstanceId) -> Result<bool> {
        let mut written = self.save_cascade(handle)?;
        while let Some(next) = self.deferred.pop() {
            tracing::debug!(work = ?next, "replaying deferred work");
            let instance = match next {
                Deferred::Resave(instance) => instance,
                Deferred::Stamp {
                    instance,
                    table,
                    column,
                    value,
                } => {
                    self.stamp(instance, table, column, value)?;
                    instance
                }
            };
            written |= self.save_cascade(instance)?;
        }
        Ok(written)
    }

    /// Save one instance unless it is already mid-save or unchanged.
    fn save_cascade(&mut self, handle: InstanceId) -> Result<bool> {
        let state = self.instance(handle)?;
        if state.saving {
            tracing::trace!(instance = %handle, "already saving");
            return Ok(false);
        }
        if !state.has_changes() {
            return Ok(false);
        }

        self.instance_mut(handle)?.saving = true;
        let result = self.write_instance(handle);
        if let Some(state) = self.arena.get_mut(handle) {
            state.saving = false;
        }
        result.map(|()| true)
    }

    fn write_instance(&mut self, handle: InstanceId) -> Result<()> {
        let was_new = self.instance(handle)?.is_new();

        let references = self.save_references(handle)?;
        self.save_implementations(handle)?;
        let id = self.save_levels(handle)?;
        if was_new {
            self.arena.remember(handle);
        }
        let collections = self.save_collections(handle, id)?;

        let state = self.instance_mut(handle)?;
        let entity = state.entity;
        state.clear_modified();
        for name in references {
            if let Some(RelationalData::Reference { dirty, .. }) = state.relations.get_mut(&name) {
                *dirty = false;
            }
        }
        for settled in collections {
            if let Some(RelationalData::Collection {
                existing,
                added,
                removed,
            }) = state.relations.get_mut(&settled.relation)
            {
                existing.extend(settled.linked);
                *added = settled.pending;
                removed.clear();
            }
        }
        self.changes.record_saved_instance(InstanceEvent {
            instance: handle,
            entity,
            id,
        });
        tracing::debug!(instance = %handle, id, created = was_new, "saved instance");
        Ok(())
    }

    /// Write `value` into a column of the row stored for `table`, bypassing
    /// the instance lock.
    fn stamp(&mut self, handle: InstanceId, table: EntityId, column: usize, value: Value) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let state = self.instance_mut(handle)?;
        let slot = state.slot_of(table).ok_or_else(|| {
            Error::Custom(format!(
                "{} has no row for {}",
                registry.structure(state.entity).name(),
                registry.structure(table).name()
            ))
        })?;
        state.write(&registry, slot, column, value);
        Ok(())
    }

    /// Stamp now, or after the outermost save when the instance is mid-save
    /// and may already have written the row.
    fn stamp_or_defer(
        &mut self,
        handle: InstanceId,
        table: EntityId,
        column: usize,
        value: Value,
    ) -> Result<()> {
        if self.instance(handle)?.saving {
            self.deferred.push(Deferred::Stamp {
                instance: handle,
                table,
                column,
                value,
            });
            Ok(())
        } else {
            self.stamp(handle, table, column, value)
        }
    }

    fn defer_resave(&mut self, handle: InstanceId) {
        let work = Deferred::Resave(handle);
        if !self.deferred.contains(&work) {
            self.deferred.push(work);
        }
    }

    // ------------------------------------------------------------------------
    // Stage 1: references
    // ------------------------------------------------------------------------

    fn save_references(&mut self, handle: InstanceId) -> Result<Vec<String>> {
        let state = self.instance(handle)?;
        let entity = state.entity;
        let pending: Vec<(String, Option<InstanceId>)> = state
            .relations
            .iter()
            .filter_map(|(name, data)| match data {
                RelationalData::Reference {
                    target,
                    dirty: true,
                } => Some((name.clone(), *target)),
                _ => None,
            })
            .collect();

        let mut settled = Vec::with_capacity(pending.len());
        for (name, target) in pending {
            let relation = self.relation_of(entity, &name)?;
            let RelationKind::Reference { column } = relation.kind else {
                continue;
            };
            let value = match target {
                None => Value::Null,
                Some(target) => {
                    let target_state = self.instance(target)?;
                    if target_state.saving && target_state.is_new() {
                        tracing::debug!(relation = %name, target = %target, "reference target mid-save; deferring");
                        self.defer_resave(handle);
                        continue;
                    }
                    self.save_cascade(target)?;
                    let id = self.instance(target)?.id().ok_or_else(|| {
                        Error::session(
                            SessionErrorKind::NotPersisted,
                            format!("reference target {} has no id after save", target),
                        )
                    })?;
                    Value::BigInt(id)
                }
            };
            self.stamp(handle, relation.owner, column, value)?;
            settled.push(name);
        }
        Ok(settled)
    }

    // ------------------------------------------------------------------------
    // Stage 2: implementation rows
    // ------------------------------------------------------------------------

    fn save_implementations(&mut self, handle: InstanceId) -> Result<()> {
        let state = self.instance(handle)?;
        let entity = state.entity;
        let level_count = state.level_count;
        let implementations = self.registry.structure(entity).implementations().to_vec();

        for (k, implementation) in implementations.iter().enumerate() {
            let Some(row) = self.instance(handle)?.row(level_count + k).cloned() else {
                continue;
            };
            let id = self.write_row(&row, implementation.entity, None)?;
            self.stamp(handle, entity, implementation.link_column, Value::BigInt(id))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stage 3: inheritance levels
    // ------------------------------------------------------------------------

    /// Write every level row root first and return the instance id.
    fn save_levels(&mut self, handle: InstanceId) -> Result<i64> {
        let state = self.instance(handle)?;
        let layout = state.layout.clone();
        let level_count = state.level_count;

        let mut id = None;
        for (slot, table) in layout.iter().take(level_count).enumerate() {
            let Some(row) = self.instance(handle)?.row(slot).cloned() else {
                continue;
            };
            let explicit = if slot == 0 { None } else { id };
            id = Some(self.write_row(&row, *table, explicit)?);
        }
        id.ok_or_else(|| {
            Error::session(
                SessionErrorKind::NotPersisted,
                format!("instance {} has no level rows", handle),
            )
        })
    }

    /// Insert or update one raw row and return its id. A persisted row with
    /// no modified columns is left alone.
    fn write_row(&mut self, row: &SharedRow, table: EntityId, explicit_id: Option<i64>) -> Result<i64> {
        let registry = Arc::clone(&self.registry);
        let structure = registry.structure(table);
        let (current, modified) = {
            let guard = row.read().unwrap_or_else(PoisonError::into_inner);
            (guard.id(), guard.is_modified())
        };

        if let Some(id) = current {
            if modified {
                let statement = {
                    let guard = row.read().unwrap_or_else(PoisonError::into_inner);
                    statements::update_row(structure, &guard, &self.options)?
                };
                if let Some((sql, params)) = statement {
                    self.execute(&sql, &params)?;
                    tracing::debug!(table = structure.table(), id, "updated row");
                }
                self.changes.record_update((table, id), Arc::clone(row));
            }
            return Ok(id);
        }

        let (sql, params) = {
            let guard = row.read().unwrap_or_else(PoisonError::into_inner);
            statements::insert_row(structure, &guard, explicit_id, &self.options)?
        };
        let id = match explicit_id {
            Some(id) => {
                self.execute(&sql, &params)?;
                id
            }
            None => self.insert(&sql, &params)?,
        };
        row.write().unwrap_or_else(PoisonError::into_inner).set_id(id);

        if let Some(sequence) = structure.sequence_column() {
            let (sql, params) =
                statements::update_column(structure, sequence, Value::BigInt(id), id, &self.options);
            self.execute(&sql, &params)?;
            row.write()
                .unwrap_or_else(PoisonError::into_inner)
                .assign(sequence, Value::BigInt(id));
        }

        self.changes.record_insert((table, id), Arc::clone(row));
        tracing::debug!(table = structure.table(), id, "inserted row");
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Stage 4: collections
    // ------------------------------------------------------------------------

    fn save_collections(&mut self, handle: InstanceId, owner_id: i64) -> Result<Vec<Settled>> {
        let state = self.instance(handle)?;
        let entity = state.entity;
        let pending: Vec<(String, Vec<InstanceId>, Vec<InstanceId>, Vec<InstanceId>)> = state
            .relations
            .iter()
            .filter_map(|(name, data)| match data {
                RelationalData::Collection {
                    existing,
                    added,
                    removed,
                } => Some((name.clone(), existing.clone(), added.clone(), removed.clone())),
                RelationalData::Reference { .. } => None,
            })
            .collect();

        let mut settled = Vec::with_capacity(pending.len());
        for (name, existing, added, removed) in pending {
            let relation = self.relation_of(entity, &name)?;
            let mut linked = Vec::with_capacity(added.len());
            let mut unlinked = Vec::new();

            match &relation.kind {
                RelationKind::Children { back_reference } => {
                    for child in existing.iter().chain(&added) {
                        self.stamp_or_defer(
                            *child,
                            back_reference.entity,
                            back_reference.index,
                            Value::BigInt(owner_id),
                        )?;
                        self.save_cascade(*child)?;
                    }
                    for child in &removed {
                        self.stamp_or_defer(
                            *child,
                            back_reference.entity,
                            back_reference.index,
                            Value::Null,
                        )?;
                        self.save_cascade(*child)?;
                    }
                    linked = added;
                }
                RelationKind::Association {
                    table,
                    source_column,
                    target_column,
                } => {
                    for child in &existing {
                        self.save_cascade(*child)?;
                    }
                    for child in added {
                        self.save_cascade(child)?;
                        let Some(child_id) = self.instance(child)?.id() else {
                            tracing::debug!(relation = %name, child = %child, "association member mid-save; deferring");
                            self.defer_resave(handle);
                            unlinked.push(child);
                            continue;
                        };
                        let (sql, params) = statements::insert_link(
                            table,
                            source_column,
                            target_column,
                            owner_id,
                            child_id,
                            &self.options,
                        );
                        self.execute(&sql, &params)?;
                        linked.push(child);
                    }
                    for child in &removed {
                        if let Some(child_id) = self.instance(*child)?.id() {
                            let (sql, params) = statements::delete_link(
                                table,
                                source_column,
                                target_column,
                                owner_id,
                                child_id,
                                &self.options,
                            );
                            self.execute(&sql, &params)?;
                        }
                    }
                }
                RelationKind::Reference { .. } => continue,
            }

            settled.push(Settled {
                relation: name,
                linked,
                pending: unlinked,
            });
        }
        Ok(settled)
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Delete a persisted instance: association rows naming it, then level
    /// rows leaf first, then implementation rows.
    ///
    /// Related instances are not deleted. The cache evicts the rows when the
    /// unit commits.
    #[tracing::instrument(level = "debug", skip(self), fields(instance = %handle))]
    pub fn delete(&mut self, handle: InstanceId) -> Result<()> {
        let state = self.instance(handle)?;
        let entity = state.entity;
        let id = state.id().ok_or_else(|| {
            Error::session(
                SessionErrorKind::NotPersisted,
                format!("instance {} was never saved", handle),
            )
        })?;
        let levels: Vec<EntityId> = state.layout[..state.level_count].to_vec();
        let implementations: Vec<(EntityId, i64)> = state.layout[state.level_count..]
            .iter()
            .enumerate()
            .filter_map(|(k, table)| {
                let row = state.row(state.level_count + k)?;
                let id = row.read().unwrap_or_else(PoisonError::into_inner).id()?;
                Some((*table, id))
            })
            .collect();

        self.begin_unit()?;
        let registry = Arc::clone(&self.registry);

        for structure in registry.iter() {
            for relation in structure.relations() {
                let RelationKind::Association {
                    table,
                    source_column,
                    target_column,
                } = &relation.kind
                else {
                    continue;
                };
                if registry.is_a(entity, relation.owner) {
                    let (sql, params) = statements::delete_links(table, source_column, id, &self.options);
                    self.execute(&sql, &params)?;
                }
                if registry.is_a(entity, relation.target) {
                    let (sql, params) = statements::delete_links(table, target_column, id, &self.options);
                    self.execute(&sql, &params)?;
                }
            }
        }

        for table in levels.iter().rev() {
            let (sql, params) = statements::delete_row(registry.structure(*table), id, &self.options);
            self.execute(&sql, &params)?;
            self.changes.record_delete((*table, id));
        }
        for (table, row_id) in implementations {
            let (sql, params) = statements::delete_row(registry.structure(table), row_id, &self.options);
            self.execute(&sql, &params)?;
            self.changes.record_delete((table, row_id));
        }

        self.arena.forget(entity, id);
        self.instance_mut(handle)?.deleted = true;
        self.changes.record_deleted_instance(InstanceEvent {
            instance: handle,
            entity,
            id,
        });
        tracing::debug!(id, "deleted instance");
        self.end_unit();
        Ok(())
    }
}
