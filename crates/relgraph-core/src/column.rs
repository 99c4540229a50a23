//! Column descriptors.

use crate::structure::EntityId;
use crate::types::ColumnType;

/// How a column participates in the entity graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    /// The entity's primary key
    Primary,
    /// Holds the primary key of another entity, named at registration
    Reference { target: String },
    /// Plain data column
    Ordinary,
}

/// Metadata about one column of an entity.
///
/// Descriptors are handed to the registry as part of an
/// [`EntityDescriptor`](crate::EntityDescriptor); the registry resolves
/// reference targets and fixes each column's position. A registered column is
/// never modified afterwards.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name, also used as the field name
    pub name: String,
    /// Declared value type
    pub column_type: ColumnType,
    /// Primary / reference / ordinary tag
    pub role: ColumnRole,
    /// Whether NULL is an acceptable persisted value
    pub nullable: bool,
    /// Whether the column carries a unique constraint
    pub unique: bool,
    target_id: Option<EntityId>,
}

impl Column {
    /// Create an ordinary column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            role: ColumnRole::Ordinary,
            nullable: false,
            unique: false,
            target_id: None,
        }
    }

    /// Create the primary-key column. Primary keys are 64-bit integers
    /// generated by the database.
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            role: ColumnRole::Primary,
            unique: true,
            ..Self::new(name, ColumnType::BigInt)
        }
    }

    /// Create a nullable column holding the id of `target`.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            role: ColumnRole::Reference {
                target: target.into(),
            },
            nullable: true,
            ..Self::new(name, ColumnType::BigInt)
        }
    }

    /// Allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Reject NULL values.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as unique; unique columns can be used with
    /// `find_unique`.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.role == ColumnRole::Primary
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.role, ColumnRole::Reference { .. })
    }

    /// The referenced entity, once resolved by the registry.
    pub fn target(&self) -> Option<EntityId> {
        self.target_id
    }

    pub(crate) fn resolve_target(&mut self, id: EntityId) {
        self.target_id = Some(id);
    }
}
