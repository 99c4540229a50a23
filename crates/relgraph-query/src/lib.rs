//! Query construction and SQL compilation for relgraph.
//!
//! `relgraph-query` is the **build-time layer**. Nothing here performs I/O:
//!
//! - [`Filter`] is a flat token sequence with explicit AND/OR and nested
//!   sub-filters for grouping.
//! - [`Query`] and [`Join`] describe a primary entity, its join tree, ordering
//!   and pagination.
//! - [`Query::compile`] turns the description into a [`CompiledQuery`]: SQL
//!   text, ordered parameters and the projection layout the materializer
//!   walks.
//!
//! Errors raised here are always [`relgraph_core::Error::Build`] and surface
//! before any statement reaches a transport.

pub mod clause;
pub mod compile;
pub mod filter;
pub mod query;

pub use clause::{OrderBy, OrderDirection};
pub use compile::{CompiledNode, CompiledParam, CompiledQuery, ProjectionBlock};
pub use filter::{Filter, FilterEntity, Operator, Param};
pub use query::{CompileOptions, Dialect, Join, Query};
