//! relgraph - an object-relational mapping engine over a runtime model registry.
//!
//! relgraph maps entity graphs onto relational tables:
//!
//! - Entities are described once, at startup, as data ([`EntityDescriptor`])
//!   and validated into a [`ModelRegistry`]
//! - Queries are filter trees plus a join tree, compiled to one SELECT with
//!   aliased LEFT JOINs
//! - Loaded rows live in a shared, bounded [`RowCache`]; instances hold
//!   copy-on-write references to them
//! - [`Session::save`] cascades through references, inheritance levels,
//!   implementation tables and collections in dependency order
//!
//! # Quick Start
//!
//! ```ignore
//! use relgraph::prelude::*;
//!
//! let registry = ModelRegistry::builder()
//!     .entity(
//!         EntityDescriptor::new("Team", "team")
//!             .column(Column::primary("id"))
//!             .column(Column::new("name", ColumnType::Text).unique()),
//!     )
//!     .build()?;
//! let engine = Engine::new(registry);
//! let team = engine.entity("Team")?;
//!
//! let mut session = engine.session(SqliteConnection::open_memory()?);
//! let red = session.create(team)?;
//! session.set(red, "name", "Red")?;
//! session.save(red)?;
//! session.commit()?;
//!
//! let found = session.fetch(&Query::new(team).filter(Filter::new().is("name", "Red")))?;
//! ```

pub use relgraph_core::{
    BuildError, BuildErrorKind, Column, ColumnRole, ColumnType, DatabaseError, DatabaseErrorKind,
    EntityDescriptor, EntityId, Error, LockedError, ModelRegistry, ModelRow, ModelStructure,
    Relation, RelationKind, Result, Row, SchemaError, SchemaErrorKind, SessionError,
    SessionErrorKind, Transport, TypeError, Value,
};

pub use relgraph_query::{
    CompileOptions, CompiledQuery, Dialect, Filter, Join, Operator, OrderBy, OrderDirection,
    Param, Query,
};

pub use relgraph_session::{
    CacheStats, Engine, EngineConfig, InstanceEvent, InstanceId, InstanceTree, RelationalData,
    RowCache, RowCacheConfig, Session, SessionConfig, SessionEvent,
};

#[cfg(feature = "sqlite")]
pub use relgraph_sqlite::{SqliteConfig, SqliteConnection};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Column, ColumnType, CompileOptions, Engine, EngineConfig, EntityDescriptor, EntityId,
        Error, Filter, InstanceId, Join, ModelRegistry, OrderBy, Query, Result, Session,
        Transport, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConnection;
}
