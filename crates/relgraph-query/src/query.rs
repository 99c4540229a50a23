//! Query and join builders.

use std::sync::{Arc, Mutex, PoisonError};

use relgraph_core::{EntityId, ModelRegistry, Result};
use serde::{Deserialize, Serialize};

use crate::clause::OrderBy;
use crate::compile::{CompiledQuery, Compiler};
use crate::filter::Filter;

/// Placeholder style of the emitted SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `?` for every parameter (SQLite, MySQL)
    #[default]
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

impl Dialect {
    /// Placeholder for the parameter at 1-based `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Question => "?".to_string(),
            Dialect::Numbered => format!("${index}"),
        }
    }
}

/// Options that change the emitted SQL. A compiled query is only reused for
/// the options it was compiled with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub dialect: Dialect,
    /// Schema prefix applied to every table name
    pub schema: Option<String>,
}

impl CompileOptions {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// A join to a relation of the enclosing node, with its own filter,
/// ordering and nested joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub(crate) relation: String,
    pub(crate) filter: Filter,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) joins: Vec<Join>,
}

impl Join {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: Filter::new(),
            order: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// AND `filter` onto this join's filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }
}

/// A build-time query description: primary entity, filter, join tree,
/// ordering and pagination.
///
/// The compiled form is cached on first [`Query::compile`]. Any `&mut` edit
/// drops the cached form, so the next compile sees the edit.
#[derive(Debug)]
pub struct Query {
    pub(crate) entity: EntityId,
    pub(crate) filter: Filter,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) joins: Vec<Join>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    compiled: Mutex<Option<(CompileOptions, Arc<CompiledQuery>)>>,
}

impl Clone for Query {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity,
            filter: self.filter.clone(),
            order: self.order.clone(),
            joins: self.joins.clone(),
            limit: self.limit,
            offset: self.offset,
            compiled: Mutex::new(self.cached()),
        }
    }
}

impl Query {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            filter: Filter::new(),
            order: Vec::new(),
            joins: Vec::new(),
            limit: None,
            offset: None,
            compiled: Mutex::new(None),
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn get_filter(&self) -> &Filter {
        &self.filter
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    /// AND `filter` onto the primary filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self.invalidate();
        self
    }

    /// Edit the primary filter in place. Drops the compiled form.
    pub fn filter_mut(&mut self) -> &mut Filter {
        self.invalidate();
        &mut self.filter
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self.invalidate();
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self.invalidate();
        self
    }

    /// Maximum number of primary entities, regardless of join fan-out.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self.invalidate();
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.invalidate();
        self
    }

    /// Move to another page. Drops the compiled form.
    pub fn set_page(&mut self, limit: Option<u64>, offset: Option<u64>) {
        self.limit = limit;
        self.offset = offset;
        self.invalidate();
    }

    pub fn is_compiled(&self) -> bool {
        self.cached().is_some()
    }

    fn cached(&self) -> Option<(CompileOptions, Arc<CompiledQuery>)> {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn invalidate(&mut self) {
        *self
            .compiled
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Compile to SQL, reusing the cached form when `options` match.
    pub fn compile(
        &self,
        registry: &ModelRegistry,
        options: &CompileOptions,
    ) -> Result<Arc<CompiledQuery>> {
        let mut slot = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_options, compiled)) = slot.as_ref() {
            if cached_options == options {
                return Ok(Arc::clone(compiled));
            }
        }
        let compiled = Arc::new(Compiler::new(registry, options).compile(self)?);
        *slot = Some((options.clone(), Arc::clone(&compiled)));
        Ok(compiled)
    }
}
