//! Sessions, the row cache and cascading persistence for relgraph.
//!
//! `relgraph-session` is the **unit-of-work layer**. It turns compiled queries
//! into instance graphs and instance edits back into SQL:
//!
//! - **Row cache**: one shared [`relgraph_core::ModelRow`] per `(table, id)`
//!   across every session of an [`Engine`].
//! - **Materializer**: splits flat result rows into instances, reusing cached
//!   rows so repeated loads converge on one row.
//! - **Persistence**: [`Session::save`] writes references, implementation
//!   rows, inheritance levels and collections in dependency order.
//! - **Change set**: written rows reach the cache only when the unit commits.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new(registry);
//! let mut session = engine.session(transport);
//!
//! let team = session.create(engine.entity("Team")?)?;
//! session.set(team, "name", "Avengers")?;
//! session.save(team)?;
//! session.commit()?;
//! ```

pub mod change_set;
pub mod config;
pub mod engine;
pub mod instance;
pub mod materialize;
mod persist;
pub mod row_cache;
mod statements;
pub mod tree;
pub mod unique;

pub use change_set::{ChangeSet, InstanceEvent, PendingCounts, Published};
pub use config::{EngineConfig, RowCacheConfig, SessionConfig};
pub use engine::Engine;
pub use instance::{Arena, InstanceId, ModelInstance, RelationalData};
pub use materialize::Materializer;
pub use row_cache::{CacheStats, RowCache, RowKey};
pub use tree::InstanceTree;
pub use unique::UniqueLookups;

use std::sync::Arc;

use relgraph_core::{
    BuildError, BuildErrorKind, Column, EntityId, Error, LockedError, ModelRegistry, Relation,
    RelationKind, Result, SessionErrorKind, Transport, Value,
};
use relgraph_query::{CompileOptions, CompiledQuery, Filter, Join, Query};

use crate::persist::Deferred;

// ============================================================================
// Session Events
// ============================================================================

/// Session event callback. Returning `Err` from a before-commit callback
/// aborts the commit.
type SessionEventFn = Box<dyn FnMut() -> Result<()> + Send>;

/// Instance interceptor, called once the row cache reflects the change.
type InstanceEventFn = Box<dyn FnMut(&InstanceEvent) + Send>;

#[derive(Default)]
pub struct SessionEventCallbacks {
    before_commit: Vec<SessionEventFn>,
    after_commit: Vec<SessionEventFn>,
    after_rollback: Vec<SessionEventFn>,
    updated: Vec<InstanceEventFn>,
    deleted: Vec<InstanceEventFn>,
}

impl std::fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("before_commit", &self.before_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_rollback", &self.after_rollback.len())
            .field("updated", &self.updated.len())
            .field("deleted", &self.deleted.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    fn fire(&mut self, event: SessionEvent) -> Result<()> {
        let callbacks = match event {
            SessionEvent::BeforeCommit => &mut self.before_commit,
            SessionEvent::AfterCommit => &mut self.after_commit,
            SessionEvent::AfterRollback => &mut self.after_rollback,
        };
        for cb in callbacks.iter_mut() {
            cb()?;
        }
        Ok(())
    }

    fn announce(&mut self, published: &Published) {
        for event in &published.updated {
            for cb in &mut self.updated {
                cb(event);
            }
        }
        for event in &published.deleted {
            for cb in &mut self.deleted {
                cb(event);
            }
        }
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fired before the transport commits.
    BeforeCommit,
    /// Fired after commit, once the row cache is consistent.
    AfterCommit,
    /// Fired after rollback.
    AfterRollback,
}

// ============================================================================
// Session
// ============================================================================

/// One logical unit of work over one transport.
///
/// A session owns its instances (addressed by [`InstanceId`]) and is not
/// meant to be shared between threads; the row cache it writes into is.
pub struct Session<T: Transport> {
    registry: Arc<ModelRegistry>,
    cache: Arc<RowCache>,
    unique: Arc<UniqueLookups>,
    config: SessionConfig,
    options: CompileOptions,
    transport: T,
    arena: Arena,
    changes: ChangeSet,
    in_transaction: bool,
    deferred: Vec<Deferred>,
    events: SessionEventCallbacks,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instances", &self.arena.len())
            .field("in_transaction", &self.in_transaction)
            .field("pending", &self.changes.pending_counts())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        registry: Arc<ModelRegistry>,
        cache: Arc<RowCache>,
        unique: Arc<UniqueLookups>,
        config: &EngineConfig,
        transport: T,
    ) -> Self {
        Self {
            registry,
            cache,
            unique,
            config: config.session,
            options: config.compile.clone(),
            transport,
            arena: Arena::default(),
            changes: ChangeSet::default(),
            in_transaction: false,
            deferred: Vec::new(),
            events: SessionEventCallbacks::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<RowCache> {
        &self.cache
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Raw-row changes waiting for commit.
    pub fn pending_counts(&self) -> PendingCounts {
        self.changes.pending_counts()
    }

    // ========================================================================
    // Session Events
    // ========================================================================

    /// Register a callback to run before commit.
    ///
    /// The callback can abort the commit by returning `Err`.
    pub fn on_before_commit(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.events.before_commit.push(Box::new(f));
    }

    /// Register a callback to run after a successful commit.
    pub fn on_after_commit(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.events.after_commit.push(Box::new(f));
    }

    /// Register a callback to run after rollback.
    pub fn on_after_rollback(&mut self, f: impl FnMut() -> Result<()> + Send + 'static) {
        self.events.after_rollback.push(Box::new(f));
    }

    /// Register an interceptor for instances saved in a committed unit.
    pub fn on_updated(&mut self, f: impl FnMut(&InstanceEvent) + Send + 'static) {
        self.events.updated.push(Box::new(f));
    }

    /// Register an interceptor for instances deleted in a committed unit.
    pub fn on_deleted(&mut self, f: impl FnMut(&InstanceEvent) + Send + 'static) {
        self.events.deleted.push(Box::new(f));
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub fn instance(&self, handle: InstanceId) -> Result<&ModelInstance> {
        self.arena.get(handle).ok_or_else(|| unknown_instance(handle))
    }

    fn instance_mut(&mut self, handle: InstanceId) -> Result<&mut ModelInstance> {
        self.arena
            .get_mut(handle)
            .ok_or_else(|| unknown_instance(handle))
    }

    fn check_entity(&self, entity: EntityId) -> Result<()> {
        if entity.index() < self.registry.len() {
            Ok(())
        } else {
            Err(Error::build(
                BuildErrorKind::UnknownEntity,
                format!("entity {} is not registered", entity),
            ))
        }
    }

    fn entity_name(&self, entity: EntityId) -> &str {
        self.registry.structure(entity).name()
    }

    /// Create a new, unsaved instance of `entity`.
    pub fn create(&mut self, entity: EntityId) -> Result<InstanceId> {
        self.check_entity(entity)?;
        Ok(self.arena.push(ModelInstance::new(&self.registry, entity)))
    }

    /// Primary key of an instance, once persisted.
    pub fn id_of(&self, handle: InstanceId) -> Result<Option<i64>> {
        Ok(self.instance(handle)?.id())
    }

    pub fn entity_of(&self, handle: InstanceId) -> Result<EntityId> {
        Ok(self.instance(handle)?.entity())
    }

    /// Whether saving `handle` would write anything.
    pub fn is_modified(&self, handle: InstanceId) -> Result<bool> {
        Ok(self.instance(handle)?.has_changes())
    }

    /// Reject every further mutation of the instance.
    pub fn lock(&mut self, handle: InstanceId) -> Result<()> {
        self.instance_mut(handle)?.locked = true;
        Ok(())
    }

    /// Find the slot and column index backing `field`: own and inherited
    /// columns nearest first, then implementation tables.
    fn locate(&self, entity: EntityId, field: &str) -> Result<(EntityId, usize, &Column)> {
        let found = self
            .registry
            .find_column(entity, field)
            .map(|position| (position.entity, position.index))
            .or_else(|| {
                self.registry
                    .structure(entity)
                    .implementations()
                    .iter()
                    .find_map(|implementation| {
                        self.registry
                            .structure(implementation.entity)
                            .column_index(field)
                            .map(|index| (implementation.entity, index))
                    })
            });
        let (table, index) = found.ok_or_else(|| {
            Error::Build(
                BuildError {
                    kind: BuildErrorKind::UnknownColumn,
                    entity: None,
                    column: None,
                    message: "no such field".to_string(),
                }
                .with_entity(self.entity_name(entity))
                .with_column(field),
            )
        })?;
        let column = &self.registry.structure(table).columns()[index];
        Ok((table, index, column))
    }

    /// Read a field. Fields of rows that were never loaded read as NULL.
    pub fn get(&self, handle: InstanceId, field: &str) -> Result<Value> {
        let instance = self.instance(handle)?;
        let (table, index, _) = self.locate(instance.entity, field)?;
        Ok(instance
            .slot_of(table)
            .map_or(Value::Null, |slot| instance.value(slot, index)))
    }

    /// Write a field. Returns whether the stored value changed.
    ///
    /// The first change to a row shared with the row cache detaches it into a
    /// private copy; the cached row is untouched until commit.
    pub fn set(&mut self, handle: InstanceId, field: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let instance = self.instance(handle)?;
        let entity = instance.entity;
        if instance.locked {
            return Err(Error::Locked(LockedError {
                entity: self.entity_name(entity).to_string(),
                column: field.to_string(),
            }));
        }
        let (table, index, column) = self.locate(entity, field)?;
        if column.is_primary() {
            return Err(Error::Custom(format!(
                "primary key '{}' of {} is assigned by the database",
                field,
                self.entity_name(entity)
            )));
        }
        column.column_type.check(&column.name, &value)?;

        let registry = Arc::clone(&self.registry);
        let instance = self.instance_mut(handle)?;
        let slot = instance
            .slot_of(table)
            .ok_or_else(|| unknown_instance(handle))?;
        Ok(instance.write(&registry, slot, index, value))
    }

    // ========================================================================
    // Relations
    // ========================================================================

    fn relation_of(&self, entity: EntityId, name: &str) -> Result<Relation> {
        self.registry
            .find_relation(entity, name)
            .cloned()
            .ok_or_else(|| {
                Error::Build(
                    BuildError {
                        kind: BuildErrorKind::UnknownRelation,
                        entity: None,
                        column: None,
                        message: format!("no relation named '{}'", name),
                    }
                    .with_entity(self.entity_name(entity)),
                )
            })
    }

    /// Check that `owner` may be mutated through `relation` and that `target`
    /// fits it.
    fn relation_for_update(
        &self,
        owner: InstanceId,
        relation: &str,
        target: Option<InstanceId>,
        collection: bool,
    ) -> Result<Relation> {
        let state = self.instance(owner)?;
        if state.locked {
            return Err(Error::Locked(LockedError {
                entity: self.entity_name(state.entity).to_string(),
                column: relation.to_string(),
            }));
        }
        let descriptor = self.relation_of(state.entity, relation)?;
        if descriptor.is_collection() != collection {
            return Err(Error::session(
                SessionErrorKind::RelationKind,
                format!(
                    "'{}' on {} is not a {} relation",
                    relation,
                    self.entity_name(state.entity),
                    if collection { "collection" } else { "reference" }
                ),
            ));
        }
        if let Some(target) = target {
            let target_entity = self.instance(target)?.entity;
            if !self.registry.is_a(target_entity, descriptor.target) {
                return Err(Error::session(
                    SessionErrorKind::RelationKind,
                    format!(
                        "'{}' holds {}, not {}",
                        relation,
                        self.entity_name(descriptor.target),
                        self.entity_name(target_entity)
                    ),
                ));
            }
        }
        Ok(descriptor)
    }

    /// Point a reference relation at `target` (or clear it). The reference
    /// column is stamped when the owner is saved.
    pub fn set_reference(
        &mut self,
        owner: InstanceId,
        relation: &str,
        target: Option<InstanceId>,
    ) -> Result<()> {
        self.relation_for_update(owner, relation, target, false)?;
        self.instance_mut(owner)?.relations.insert(
            relation.to_string(),
            RelationalData::Reference {
                target,
                dirty: true,
            },
        );
        Ok(())
    }

    /// Add `child` to a collection relation, pending the owner's next save.
    pub fn add_related(&mut self, owner: InstanceId, relation: &str, child: InstanceId) -> Result<()> {
        self.relation_for_update(owner, relation, Some(child), true)?;
        let data = self
            .instance_mut(owner)?
            .relations
            .entry(relation.to_string())
            .or_insert_with(RelationalData::empty_collection);
        if let RelationalData::Collection {
            existing,
            added,
            removed,
        } = data
        {
            if let Some(pos) = removed.iter().position(|c| *c == child) {
                removed.remove(pos);
                if !existing.contains(&child) {
                    existing.push(child);
                }
            } else if !existing.contains(&child) && !added.contains(&child) {
                added.push(child);
            }
        }
        Ok(())
    }

    /// Remove `child` from a collection relation, pending the owner's next
    /// save.
    pub fn remove_related(
        &mut self,
        owner: InstanceId,
        relation: &str,
        child: InstanceId,
    ) -> Result<()> {
        self.relation_for_update(owner, relation, Some(child), true)?;
        let persisted = self.instance(child)?.id().is_some();
        let data = self
            .instance_mut(owner)?
            .relations
            .entry(relation.to_string())
            .or_insert_with(RelationalData::empty_collection);
        if let RelationalData::Collection {
            existing,
            added,
            removed,
        } = data
        {
            if let Some(pos) = added.iter().position(|c| *c == child) {
                added.remove(pos);
            } else {
                existing.retain(|c| *c != child);
                if persisted && !removed.contains(&child) {
                    removed.push(child);
                }
            }
        }
        Ok(())
    }

    /// Current members of a relation, loading it first if it was never
    /// materialized.
    pub fn related(&mut self, owner: InstanceId, relation: &str) -> Result<Vec<InstanceId>> {
        let state = self.instance(owner)?;
        if let Some(data) = state.relations.get(relation) {
            return Ok(data.members());
        }
        let descriptor = self.relation_of(state.entity, relation)?;
        if !descriptor.is_collection() {
            return Ok(self.reference(owner, relation)?.into_iter().collect());
        }
        if state.id().is_none() {
            return Ok(Vec::new());
        }
        self.load_relation(owner, relation, None)
    }

    /// Target of a reference relation, loading it by id when needed.
    pub fn reference(&mut self, owner: InstanceId, relation: &str) -> Result<Option<InstanceId>> {
        let state = self.instance(owner)?;
        let entity = state.entity;
        let descriptor = self.relation_of(entity, relation)?;
        let RelationKind::Reference { column } = descriptor.kind else {
            return Err(Error::session(
                SessionErrorKind::RelationKind,
                format!("'{}' on {} is a collection", relation, self.entity_name(entity)),
            ));
        };
        if let Some(RelationalData::Reference { target, .. }) = state.relations.get(relation) {
            return Ok(*target);
        }

        let key = state
            .slot_of(descriptor.owner)
            .and_then(|slot| state.value(slot, column).as_i64());
        let target = match key {
            Some(id) => self.find(descriptor.target, id)?,
            None => None,
        };
        self.instance_mut(owner)?.relations.insert(
            relation.to_string(),
            RelationalData::Reference {
                target,
                dirty: false,
            },
        );
        Ok(target)
    }

    /// Re-query one relation of a persisted instance, optionally narrowed by
    /// `filter`, replacing its loaded members.
    #[tracing::instrument(level = "debug", skip(self, filter), fields(owner = %owner))]
    pub fn load_relation(
        &mut self,
        owner: InstanceId,
        relation: &str,
        filter: Option<Filter>,
    ) -> Result<Vec<InstanceId>> {
        let state = self.instance(owner)?;
        let entity = state.entity;
        let id = state.id().ok_or_else(|| {
            Error::session(
                SessionErrorKind::NotPersisted,
                format!("{} must be saved before loading '{}'", self.entity_name(entity), relation),
            )
        })?;
        let descriptor = self.relation_of(entity, relation)?;

        let state = self.instance_mut(owner)?;
        match state.relations.get_mut(relation) {
            Some(RelationalData::Collection { existing, .. }) => existing.clear(),
            Some(RelationalData::Reference { dirty: true, .. }) => {}
            _ => {
                let empty = if descriptor.is_collection() {
                    RelationalData::empty_collection()
                } else {
                    RelationalData::Reference {
                        target: None,
                        dirty: false,
                    }
                };
                state.relations.insert(relation.to_string(), empty);
            }
        }

        let mut join = Join::new(relation);
        if let Some(filter) = filter {
            join = join.filter(filter);
        }
        let primary_key = self.registry.structure(entity).primary_key_name().to_string();
        let query = Query::new(entity)
            .filter(Filter::new().is(primary_key, id))
            .join(join);
        let compiled = query.compile(&self.registry, &self.options)?;
        self.run_query(&compiled, &[])?;

        Ok(self
            .instance(owner)?
            .relations
            .get(relation)
            .map(RelationalData::members)
            .unwrap_or_default())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Execute a query and return its primary instances in result order.
    pub fn fetch(&mut self, query: &Query) -> Result<Vec<InstanceId>> {
        self.fetch_with(query, &[])
    }

    /// Execute a query, filling its parameter slots from `args`.
    #[tracing::instrument(level = "debug", skip(self, query, args), fields(entity = %query.entity()))]
    pub fn fetch_with(&mut self, query: &Query, args: &[Value]) -> Result<Vec<InstanceId>> {
        self.check_entity(query.entity())?;
        let compiled = query.compile(&self.registry, &self.options)?;
        self.run_query(&compiled, args)
    }

    fn run_query(&mut self, compiled: &CompiledQuery, args: &[Value]) -> Result<Vec<InstanceId>> {
        let params = compiled.bind(args)?;
        tracing::trace!(sql = %compiled.sql(), params = params.len(), "query");
        let rows = self
            .transport
            .query(compiled.sql(), &params)
            .map_err(|e| e.with_sql(compiled.sql()))?;

        let mut materializer = Materializer::new(&self.registry, &self.cache, compiled, &rows)
            .lock_loaded(self.config.lock_loaded);
        // Ordering by a joined column can split one entity's rows; it is
        // reported once, at its first position.
        let mut records = Vec::new();
        while let Some(record) = materializer.next_record(&mut self.arena)? {
            if !records.contains(&record) {
                records.push(record);
            }
        }
        tracing::debug!(rows = rows.len(), records = records.len(), "materialized");
        Ok(records)
    }

    /// Load an instance by primary key.
    ///
    /// Served from this session first, then from the row cache when every
    /// row of the instance is retained, and only then from the database.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %entity))]
    pub fn find(&mut self, entity: EntityId, id: i64) -> Result<Option<InstanceId>> {
        self.check_entity(entity)?;
        if let Some(handle) = self.arena.lookup(entity, id) {
            return Ok(Some(handle));
        }
        if let Some(handle) = self.find_cached(entity, id) {
            tracing::debug!(id, "served from row cache");
            return Ok(Some(handle));
        }
        let primary_key = self.registry.structure(entity).primary_key_name().to_string();
        self.find_unique(entity, &primary_key, id)
    }

    fn find_cached(&mut self, entity: EntityId, id: i64) -> Option<InstanceId> {
        let registry = Arc::clone(&self.registry);
        let mut instance = ModelInstance::unloaded(&registry, entity);
        for slot in 0..instance.level_count {
            instance.rows[slot] = Some(self.cache.get(instance.layout[slot], id)?);
        }
        let leaf = instance.leaf_slot();
        for (k, implementation) in registry.structure(entity).implementations().iter().enumerate() {
            if let Some(link) = instance.value(leaf, implementation.link_column).as_i64() {
                instance.rows[instance.level_count + k] =
                    Some(self.cache.get(implementation.entity, link)?);
            }
        }
        instance.locked = self.config.lock_loaded;
        let handle = self.arena.push(instance);
        self.arena.remember(handle);
        Some(handle)
    }

    /// Load the first instance whose `column` equals `value`, through the
    /// engine's reusable compiled lookup for that column.
    pub fn find_unique(
        &mut self,
        entity: EntityId,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Option<InstanceId>> {
        self.check_entity(entity)?;
        let compiled = self
            .unique
            .compiled(&self.registry, entity, column, &self.options)?;
        Ok(self.run_query(&compiled, &[value.into()])?.into_iter().next())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction explicitly.
    pub fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            tracing::trace!("BEGIN");
            self.transport.begin()?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Start a write unit: opens a transaction when configured to.
    fn begin_unit(&mut self) -> Result<()> {
        if self.config.auto_begin {
            self.begin()?;
        }
        Ok(())
    }

    /// Outside a transaction every write is its own unit.
    fn end_unit(&mut self) {
        if !self.in_transaction {
            self.publish();
        }
    }

    fn publish(&mut self) {
        let changes = std::mem::take(&mut self.changes);
        let published = changes.publish(&self.cache);
        self.events.announce(&published);
    }

    /// Commit the transaction, then publish the unit to the row cache and
    /// announce saved and deleted instances.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::session(
                SessionErrorKind::NoTransaction,
                "commit without an open transaction",
            ));
        }
        self.events.fire(SessionEvent::BeforeCommit)?;
        tracing::trace!("COMMIT");
        self.transport.commit()?;
        self.in_transaction = false;
        self.publish();
        self.events.fire(SessionEvent::AfterCommit)
    }

    /// Roll back the transaction and discard the unit without touching the
    /// row cache.
    ///
    /// Instances keep their in-memory state, including ids assigned by
    /// rolled-back inserts.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::session(
                SessionErrorKind::NoTransaction,
                "rollback without an open transaction",
            ));
        }
        tracing::trace!("ROLLBACK");
        let result = self.transport.rollback();
        self.in_transaction = false;
        self.deferred.clear();
        let discarded = std::mem::take(&mut self.changes);
        tracing::debug!(pending = ?discarded.pending_counts(), "discarded change set");
        result?;
        self.events.fire(SessionEvent::AfterRollback)
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    /// Tree view of an instance and its materialized relations, cut off at
    /// the configured depth.
    pub fn to_tree(&self, handle: InstanceId) -> Result<InstanceTree> {
        InstanceTree::build(&self.registry, &self.arena, handle, self.config.max_tree_depth)
            .ok_or_else(|| unknown_instance(handle))
    }

    // ========================================================================
    // Transport helpers
    // ========================================================================

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "execute");
        self.transport
            .execute(sql, params)
            .map_err(|e| e.with_sql(sql))
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        tracing::trace!(sql = %sql, params = params.len(), "insert");
        self.transport
            .insert(sql, params)
            .map_err(|e| e.with_sql(sql))
    }
}

fn unknown_instance(handle: InstanceId) -> Error {
    Error::session(
        SessionErrorKind::UnknownInstance,
        format!("instance {} does not belong to this session", handle),
    )
}
