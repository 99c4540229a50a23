//! Core types for relgraph.
//!
//! This crate provides the vocabulary every other relgraph crate consumes:
//!
//! - [`Value`] and [`ColumnType`] for dynamically typed column data
//! - [`Column`] descriptors and [`EntityDescriptor`] registration input
//! - [`ModelRegistry`], the validated catalog of [`ModelStructure`]s
//! - [`ModelRow`], a raw record with a per-column modification mask
//! - [`Row`] and the [`Transport`] contract for executing SQL

pub mod column;
pub mod error;
pub mod identifiers;
pub mod model_row;
pub mod registry;
pub mod row;
pub mod structure;
pub mod transport;
pub mod types;
pub mod value;

pub use column::{Column, ColumnRole};
pub use error::{
    BuildError, BuildErrorKind, DatabaseError, DatabaseErrorKind, Error, LockedError, Result,
    SchemaError, SchemaErrorKind, SessionError, SessionErrorKind, TypeError,
};
pub use identifiers::{is_valid_identifier, qualify_table};
pub use model_row::{ColumnMask, ModelRow, SharedRow};
pub use registry::{ModelRegistry, RegistryBuilder};
pub use row::{ColumnInfo, Row};
pub use structure::{
    ColumnPosition, EntityDescriptor, EntityId, Implementation, ModelStructure, Relation,
    RelationDescriptor, RelationKind,
};
pub use transport::Transport;
pub use types::ColumnType;
pub use value::Value;
