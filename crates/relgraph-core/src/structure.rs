//! Entity descriptors and the immutable per-entity model structure.
//!
//! An [`EntityDescriptor`] is what metadata discovery hands to the registry:
//! names only, nothing resolved. The registry validates the full set and turns
//! each descriptor into a [`ModelStructure`], which is what every other
//! component consumes.

use std::collections::HashMap;
use std::fmt;

use crate::column::Column;

/// Dense identifier of a registered entity, valid for the registry that
/// assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A column addressed by the structure that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnPosition {
    pub entity: EntityId,
    pub index: usize,
}

// ============================================================================
// Descriptors (registration input)
// ============================================================================

/// Declared relation, still referring to entities and columns by name.
#[derive(Debug, Clone)]
pub enum RelationDescriptor {
    /// Single-valued relation through one of the entity's reference columns.
    Reference { name: String, column: String },
    /// One-to-many: rows of `target` carry this entity's id in `back_reference`.
    Children {
        name: String,
        target: String,
        back_reference: String,
    },
    /// Many-to-many through an intermediate table with no entity of its own.
    Association {
        name: String,
        target: String,
        table: String,
        source_column: String,
        target_column: String,
    },
}

impl RelationDescriptor {
    pub fn name(&self) -> &str {
        match self {
            RelationDescriptor::Reference { name, .. }
            | RelationDescriptor::Children { name, .. }
            | RelationDescriptor::Association { name, .. } => name,
        }
    }
}

/// Registration-time description of one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<Column>,
    pub parent: Option<String>,
    /// `(implementation entity, link column)` pairs
    pub implementations: Vec<(String, String)>,
    pub relations: Vec<RelationDescriptor>,
    pub sequence_column: Option<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            parent: None,
            implementations: Vec::new(),
            relations: Vec::new(),
            sequence_column: None,
        }
    }

    /// Append a column. Column order is the order of these calls.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare the direct parent in an inheritance hierarchy.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declare a polymorphic implementation table whose row id is stored in
    /// `link_column`.
    pub fn implementation(mut self, entity: impl Into<String>, link_column: impl Into<String>) -> Self {
        self.implementations
            .push((entity.into(), link_column.into()));
        self
    }

    /// Declare a single-valued relation through a reference column.
    pub fn reference(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.relations.push(RelationDescriptor::Reference {
            name: name.into(),
            column: column.into(),
        });
        self
    }

    /// Declare a one-to-many relation.
    pub fn children(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        back_reference: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationDescriptor::Children {
            name: name.into(),
            target: target.into(),
            back_reference: back_reference.into(),
        });
        self
    }

    /// Declare a many-to-many relation through `table`.
    pub fn association(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationDescriptor::Association {
            name: name.into(),
            target: target.into(),
            table: table.into(),
            source_column: source_column.into(),
            target_column: target_column.into(),
        });
        self
    }

    /// Mark the entity as sequenced: after insert, the generated id is copied
    /// into `column`.
    pub fn sequenced(mut self, column: impl Into<String>) -> Self {
        self.sequence_column = Some(column.into());
        self
    }
}

// ============================================================================
// Registered structure
// ============================================================================

/// Resolved relation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `column` indexes the owner's column list.
    Reference { column: usize },
    /// The back reference lives on `target` or one of its parents.
    Children { back_reference: ColumnPosition },
    Association {
        table: String,
        source_column: String,
        target_column: String,
    },
}

/// A resolved relation declared by one entity.
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    /// Entity that declared the relation
    pub owner: EntityId,
    pub target: EntityId,
    pub kind: RelationKind,
}

impl Relation {
    /// True for relations that hold many related entities.
    pub fn is_collection(&self) -> bool {
        !matches!(self.kind, RelationKind::Reference { .. })
    }
}

/// A polymorphic implementation table linked from the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Implementation {
    pub entity: EntityId,
    /// Index of the link column in the owner's column list
    pub link_column: usize,
}

/// Immutable metadata for one entity type.
#[derive(Debug, Clone)]
pub struct ModelStructure {
    pub(crate) id: EntityId,
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) field_index: HashMap<String, usize>,
    pub(crate) primary_key: usize,
    pub(crate) parents: Vec<EntityId>,
    pub(crate) implementations: Vec<Implementation>,
    pub(crate) relations: Vec<Relation>,
    pub(crate) sequence_column: Option<usize>,
}

impl ModelStructure {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in registration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of the primary-key column.
    pub fn primary_key(&self) -> usize {
        self.primary_key
    }

    pub fn primary_key_name(&self) -> &str {
        &self.columns[self.primary_key].name
    }

    /// Direct parent, if the entity inherits.
    pub fn parent(&self) -> Option<EntityId> {
        self.parents.last().copied()
    }

    /// All ancestors, root first.
    pub fn parents(&self) -> &[EntityId] {
        &self.parents
    }

    pub fn implementations(&self) -> &[Implementation] {
        &self.implementations
    }

    /// Relations declared by this entity (not its parents).
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn sequence_column(&self) -> Option<usize> {
        self.sequence_column
    }

    /// Column indexes in projection order: primary key first, then the rest
    /// in column-list order.
    pub fn projection(&self) -> Vec<usize> {
        std::iter::once(self.primary_key)
            .chain((0..self.columns.len()).filter(|&i| i != self.primary_key))
            .collect()
    }

    /// Number of physical tables an instance of this entity spans.
    pub fn effective_table_count(&self) -> usize {
        1 + self.parents.len() + self.implementations.len()
    }
}
