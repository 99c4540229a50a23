//! The model registry: one immutable catalog of every entity structure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::column::ColumnRole;
use crate::error::{Error, Result, SchemaErrorKind};
use crate::identifiers::is_valid_identifier;
use crate::structure::{
    ColumnPosition, EntityDescriptor, EntityId, Implementation, ModelStructure, Relation,
    RelationDescriptor, RelationKind,
};

/// Catalog of registered entities.
///
/// Built once at startup through [`RegistryBuilder`]; immutable afterwards
/// and shared behind an `Arc` by every engine component.
#[derive(Debug)]
pub struct ModelRegistry {
    structures: Vec<Arc<ModelStructure>>,
    by_name: HashMap<String, EntityId>,
}

/// Collects entity descriptors and validates them as a set.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: Vec<EntityDescriptor>,
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Structure for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was assigned by a different registry.
    pub fn structure(&self, id: EntityId) -> &Arc<ModelStructure> {
        &self.structures[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<ModelStructure>> {
        self.by_name.get(name).map(|id| self.structure(*id))
    }

    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelStructure>> {
        self.structures.iter()
    }

    /// Inheritance levels of `id`, root first and ending with `id` itself.
    pub fn levels_of(&self, id: EntityId) -> Vec<EntityId> {
        let mut levels = self.structure(id).parents.clone();
        levels.push(id);
        levels
    }

    /// Every table an instance spans, in row-slot order: inheritance levels
    /// root first, then implementation tables.
    pub fn table_layout(&self, id: EntityId) -> Vec<EntityId> {
        let mut layout = self.levels_of(id);
        layout.extend(self.structure(id).implementations.iter().map(|i| i.entity));
        layout
    }

    /// Find a column by name on `id` or one of its ancestors, nearest first.
    pub fn find_column(&self, id: EntityId, name: &str) -> Option<ColumnPosition> {
        self.levels_of(id).into_iter().rev().find_map(|level| {
            self.structure(level)
                .column_index(name)
                .map(|index| ColumnPosition { entity: level, index })
        })
    }

    /// Find a relation by name on `id` or one of its ancestors, nearest first.
    pub fn find_relation(&self, id: EntityId, name: &str) -> Option<&Relation> {
        self.levels_of(id)
            .into_iter()
            .rev()
            .find_map(|level| self.structure(level).relation(name))
    }

    /// Whether `id` is `ancestor` or inherits from it.
    pub fn is_a(&self, id: EntityId, ancestor: EntityId) -> bool {
        id == ancestor || self.structure(id).parents.contains(&ancestor)
    }
}

impl RegistryBuilder {
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate every descriptor and produce the registry.
    ///
    /// All names are resolved here, so descriptors may be added in any order.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.descriptors.len()))]
    pub fn build(self) -> Result<ModelRegistry> {
        let descriptors = self.descriptors;

        let mut by_name = HashMap::new();
        let mut tables = HashSet::new();
        for (i, d) in descriptors.iter().enumerate() {
            check_identifier(&d.name, &d.name)?;
            check_identifier(&d.name, &d.table)?;
            if by_name
                .insert(d.name.clone(), EntityId(i as u32))
                .is_some()
            {
                return Err(Error::schema(
                    SchemaErrorKind::DuplicateEntity,
                    &d.name,
                    format!("entity '{}' registered twice", d.name),
                ));
            }
            if !tables.insert(d.table.clone()) {
                return Err(Error::schema(
                    SchemaErrorKind::DuplicateEntity,
                    &d.name,
                    format!("table '{}' is mapped by more than one entity", d.table),
                ));
            }
        }

        let lookup = |owner: &str, name: &str| -> Result<EntityId> {
            by_name.get(name).copied().ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::UnknownEntity,
                    owner,
                    format!("unknown entity '{}'", name),
                )
            })
        };

        // Columns, primary keys and reference targets.
        let mut structures = Vec::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            let mut columns = d.columns.clone();
            let mut field_index = HashMap::with_capacity(columns.len());
            let mut primary_key = None;
            for (index, column) in columns.iter_mut().enumerate() {
                check_identifier(&d.name, &column.name)?;
                if field_index.insert(column.name.clone(), index).is_some() {
                    return Err(Error::schema(
                        SchemaErrorKind::DuplicateColumn,
                        &d.name,
                        format!("column '{}' declared twice", column.name),
                    ));
                }
                match &column.role {
                    ColumnRole::Primary => {
                        if primary_key.replace(index).is_some() {
                            return Err(Error::schema(
                                SchemaErrorKind::MultiplePrimaryKeys,
                                &d.name,
                                "more than one primary-key column",
                            ));
                        }
                    }
                    ColumnRole::Reference { target } => {
                        let target = lookup(&d.name, target)?;
                        column.resolve_target(target);
                    }
                    ColumnRole::Ordinary => {}
                }
            }
            let primary_key = primary_key.ok_or_else(|| {
                Error::schema(
                    SchemaErrorKind::MissingPrimaryKey,
                    &d.name,
                    "no primary-key column",
                )
            })?;
            let sequence_column = match &d.sequence_column {
                Some(name) => Some(field_index.get(name).copied().ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::UnknownColumn,
                        &d.name,
                        format!("sequence column '{}' does not exist", name),
                    )
                })?),
                None => None,
            };
            structures.push(ModelStructure {
                id: EntityId(i as u32),
                name: d.name.clone(),
                table: d.table.clone(),
                columns,
                field_index,
                primary_key,
                parents: Vec::new(),
                implementations: Vec::new(),
                relations: Vec::new(),
                sequence_column,
            });
        }

        // Parent chains, root first.
        for (i, d) in descriptors.iter().enumerate() {
            let mut chain = Vec::new();
            let mut seen = HashSet::from([i]);
            let mut current = d.parent.as_deref();
            while let Some(parent_name) = current {
                let parent = lookup(&d.name, parent_name)?;
                if !seen.insert(parent.index()) {
                    return Err(Error::schema(
                        SchemaErrorKind::HierarchyCycle,
                        &d.name,
                        format!("inheritance chain loops through '{}'", parent_name),
                    ));
                }
                chain.push(parent);
                current = descriptors[parent.index()].parent.as_deref();
            }
            chain.reverse();
            structures[i].parents = chain;
        }

        // Implementations and relations need every structure's parents.
        for (i, d) in descriptors.iter().enumerate() {
            let mut implementations = Vec::with_capacity(d.implementations.len());
            for (entity, link) in &d.implementations {
                let entity = lookup(&d.name, entity)?;
                if !structures[entity.index()].parents.is_empty() {
                    return Err(Error::schema(
                        SchemaErrorKind::InvalidRelation,
                        &d.name,
                        format!(
                            "implementation '{}' must not inherit",
                            structures[entity.index()].name
                        ),
                    ));
                }
                let link_column = own_column(&structures[i], link)?;
                implementations.push(Implementation {
                    entity,
                    link_column,
                });
            }

            let mut relations = Vec::with_capacity(d.relations.len());
            let mut names = HashSet::new();
            for rd in &d.relations {
                check_identifier(&d.name, rd.name())?;
                if !names.insert(rd.name().to_string()) {
                    return Err(Error::schema(
                        SchemaErrorKind::InvalidRelation,
                        &d.name,
                        format!("relation '{}' declared twice", rd.name()),
                    ));
                }
                relations.push(resolve_relation(
                    &structures,
                    &structures[i],
                    rd,
                    &lookup,
                )?);
            }

            structures[i].implementations = implementations;
            structures[i].relations = relations;
        }

        tracing::debug!(entities = structures.len(), "model registry built");

        Ok(ModelRegistry {
            structures: structures.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }
}

fn check_identifier(entity: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::schema(
            SchemaErrorKind::InvalidIdentifier,
            entity,
            format!("'{}' is not a valid SQL identifier", name),
        ))
    }
}

fn own_column(structure: &ModelStructure, name: &str) -> Result<usize> {
    structure.column_index(name).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::UnknownColumn,
            &structure.name,
            format!("column '{}' does not exist", name),
        )
    })
}

fn resolve_relation(
    structures: &[ModelStructure],
    owner: &ModelStructure,
    descriptor: &RelationDescriptor,
    lookup: &impl Fn(&str, &str) -> Result<EntityId>,
) -> Result<Relation> {
    let invalid = |message: String| Error::schema(SchemaErrorKind::InvalidRelation, &owner.name, message);

    let (name, target, kind) = match descriptor {
        RelationDescriptor::Reference { name, column } => {
            let index = own_column(owner, column)?;
            let target = owner.columns[index].target().ok_or_else(|| {
                invalid(format!(
                    "relation '{}' uses '{}', which is not a reference column",
                    name, column
                ))
            })?;
            (name, target, RelationKind::Reference { column: index })
        }
        RelationDescriptor::Children {
            name,
            target,
            back_reference,
        } => {
            let target = lookup(&owner.name, target)?;
            let target_structure = &structures[target.index()];
            let back_reference = std::iter::once(target)
                .chain(target_structure.parents.iter().rev().copied())
                .find_map(|level| {
                    structures[level.index()]
                        .column_index(back_reference)
                        .map(|index| ColumnPosition {
                            entity: level,
                            index,
                        })
                })
                .ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::UnknownColumn,
                        &owner.name,
                        format!(
                            "back reference '{}' does not exist on '{}'",
                            back_reference, target_structure.name
                        ),
                    )
                })?;
            (name, target, RelationKind::Children { back_reference })
        }
        RelationDescriptor::Association {
            name,
            target,
            table,
            source_column,
            target_column,
        } => {
            let target = lookup(&owner.name, target)?;
            check_identifier(&owner.name, table)?;
            check_identifier(&owner.name, source_column)?;
            check_identifier(&owner.name, target_column)?;
            if source_column == target_column {
                return Err(invalid(format!(
                    "relation '{}' uses '{}' for both sides of '{}'",
                    name, source_column, table
                )));
            }
            if structures.iter().any(|s| s.table == *table) {
                return Err(invalid(format!(
                    "intermediate table '{}' of relation '{}' is mapped by an entity",
                    table, name
                )));
            }
            (
                name,
                target,
                RelationKind::Association {
                    table: table.clone(),
                    source_column: source_column.clone(),
                    target_column: target_column.clone(),
                },
            )
        }
    };

    Ok(Relation {
        name: name.clone(),
        owner: owner.id,
        target,
        kind,
    })
}
