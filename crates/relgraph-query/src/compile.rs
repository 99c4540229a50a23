//! SQL compiler.
//!
//! Compilation runs in two passes over the join tree:
//!
//! 1. **Alias assignment.** A depth-first walk gives every table occurrence
//!    its own alias (`t0`, `t1`, ...). A node takes aliases for its own table,
//!    then its inheritance parents root first, then its implementation tables.
//!    For each join, a many-to-many intermediate table takes its alias before
//!    the joined node does.
//! 2. **Emission.** Every non-intermediate alias projects all of its columns,
//!    primary key first. The layout of those column blocks is returned with the
//!    SQL so the materializer can split each result row back into entities.
//!
//! When a query has joins and is paged, the page must count primary entities
//! rather than joined rows. If the primary filter and ordering only touch the
//! primary entity, the primary table is wrapped in a subquery carrying them
//! and LIMIT/OFFSET. Otherwise the page is chosen by primary key over the full
//! join (`t0.id IN (SELECT t0.id ... GROUP BY t0.id ORDER BY ... LIMIT ...)`),
//! ordering each primary entity by its smallest (ascending) or largest
//! (descending) joined value.

use relgraph_core::{
    BuildError, BuildErrorKind, ColumnType, EntityId, Error, ModelRegistry, Relation,
    RelationKind, Result, Value, qualify_table,
};

use crate::clause::{OrderBy, OrderDirection};
use crate::filter::{Filter, FilterEntity, Operator, Param};
use crate::query::{CompileOptions, Dialect, Join, Query};

/// The projected columns of one table occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionBlock {
    /// Table (entity level) the block was read from
    pub entity: EntityId,
    pub alias: String,
    /// Position of the block's first column (the primary key) in a result row
    pub offset: usize,
    /// Column indexes of `entity`, in projection order
    pub columns: Vec<usize>,
}

/// One entity occurrence in the join tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledNode {
    pub entity: EntityId,
    /// Index of the node this one was joined from
    pub parent: Option<usize>,
    /// Name of the relation this node was reached through
    pub relation: Option<String>,
    pub blocks: Vec<ProjectionBlock>,
}

impl CompiledNode {
    /// The block of the node's own table, whose primary key identifies the
    /// entity.
    pub fn identity_block(&self) -> Option<&ProjectionBlock> {
        self.blocks.iter().find(|b| b.entity == self.entity)
    }
}

/// A compiled parameter: a value already shaped for its column, or a slot
/// filled at bind time.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledParam {
    Value(Value),
    Slot { index: usize, column_type: ColumnType },
}

/// SQL text, ordered parameters and projection layout.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    sql: String,
    params: Vec<CompiledParam>,
    nodes: Vec<CompiledNode>,
    width: usize,
}

impl CompiledQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[CompiledParam] {
        &self.params
    }

    /// Number of placeholders in the SQL text.
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Number of execution-time slots the query expects.
    pub fn slot_count(&self) -> usize {
        self.params
            .iter()
            .filter_map(|p| match p {
                CompiledParam::Slot { index, .. } => Some(index + 1),
                CompiledParam::Value(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Join-tree nodes in alias order; node 0 is the primary entity.
    pub fn layout(&self) -> &[CompiledNode] {
        &self.nodes
    }

    /// Number of projected columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Produce the parameter list for execution, filling slots from `args`.
    pub fn bind(&self, args: &[Value]) -> Result<Vec<Value>> {
        self.params
            .iter()
            .map(|param| match param {
                CompiledParam::Value(value) => Ok(value.clone()),
                CompiledParam::Slot { index, column_type } => match args.get(*index) {
                    Some(value) => column_type.encode(value),
                    None => Err(Error::build(
                        BuildErrorKind::UnboundParameter,
                        format!("parameter slot {} has no value", index),
                    )),
                },
            })
            .collect()
    }
}

struct PlannedNode<'q> {
    entity: EntityId,
    parent: Option<usize>,
    relation: Option<Relation>,
    filter: &'q Filter,
    order: &'q [OrderBy],
    /// Own table, parents root first, then implementations
    tables: Vec<(EntityId, String)>,
    level_count: usize,
    /// Table joined first; the other levels hang off its primary key
    anchor: EntityId,
    link_alias: Option<String>,
}

impl PlannedNode<'_> {
    fn alias_of(&self, table: EntityId) -> Option<&str> {
        self.tables
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, alias)| alias.as_str())
    }

    fn own_alias(&self) -> &str {
        &self.tables[0].1
    }
}

struct Resolved {
    sql: String,
    column_type: ColumnType,
    node: usize,
}

/// How a paged join query restricts its primary entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    None,
    /// Row-limited subquery over the primary table
    Subquery,
    /// Primary keys selected over the full join
    Keys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Term,
    Operator,
    Parameter,
    Connective,
}

pub(crate) struct Compiler<'r> {
    registry: &'r ModelRegistry,
    options: &'r CompileOptions,
    next_alias: usize,
}

impl<'r> Compiler<'r> {
    pub(crate) fn new(registry: &'r ModelRegistry, options: &'r CompileOptions) -> Self {
        Self {
            registry,
            options,
            next_alias: 0,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, query), fields(entity = %query.entity))]
    pub(crate) fn compile(mut self, query: &Query) -> Result<CompiledQuery> {
        if query.entity.index() >= self.registry.len() {
            return Err(Error::build(
                BuildErrorKind::UnknownEntity,
                format!("entity {} is not registered", query.entity),
            ));
        }

        let mut nodes = Vec::new();
        self.plan(
            &mut nodes,
            query.entity,
            None,
            None,
            &query.filter,
            &query.order,
            &query.joins,
        )?;

        let page = if nodes.len() > 1 && (query.limit.is_some() || query.offset.is_some()) {
            if self.primary_reaches_joins(&nodes)? {
                Page::Keys
            } else {
                Page::Subquery
            }
        } else {
            Page::None
        };
        let mut params = Vec::new();
        let (projection, compiled_nodes) = self.projection(&nodes);
        let width = projection.len();

        let mut sql = format!("SELECT {}", projection.join(", "));

        let root = &nodes[0];
        let root_alias = root.own_alias();
        let root_table = self.table_name(root.entity);
        let root_levels = self.level_joins(root, true);
        let mut joins = String::new();
        for node in &nodes[1..] {
            joins.push_str(&self.relation_join(&nodes, node));
            joins.push_str(&self.level_joins(node, false));
        }

        if page == Page::Subquery {
            let mut inner = format!("SELECT {root_alias}.* FROM {root_table} {root_alias}{root_levels}");
            if !root.filter.is_empty() {
                let filter = self.render_filter(&nodes, 0, root.filter, &mut params)?;
                inner.push_str(" WHERE ");
                inner.push_str(&filter);
            }
            inner.push_str(" ORDER BY ");
            inner.push_str(&self.order_terms(&nodes, 0)?.join(", "));
            inner.push_str(&self.paging(query.limit, query.offset));
            sql.push_str(&format!(" FROM ({inner}) {root_alias}{root_levels}"));
        } else {
            sql.push_str(&format!(" FROM {root_table} {root_alias}{root_levels}"));
        }
        sql.push_str(&joins);

        let mut clauses = Vec::new();
        if page == Page::Keys {
            let key = self.primary_key_of(root);
            let mut inner =
                format!("SELECT {key} FROM {root_table} {root_alias}{root_levels}{joins}");
            if !root.filter.is_empty() {
                let filter = self.render_filter(&nodes, 0, root.filter, &mut params)?;
                inner.push_str(" WHERE ");
                inner.push_str(&filter);
            }
            let (group, order) = self.page_order(&nodes)?;
            inner.push_str(&format!(
                " GROUP BY {} ORDER BY {}",
                group.join(", "),
                order.join(", ")
            ));
            inner.push_str(&self.paging(query.limit, query.offset));
            clauses.push((format!("{key} IN ({inner})"), false));
        }

        for (index, node) in nodes.iter().enumerate() {
            if node.filter.is_empty() || (page == Page::Subquery && index == 0) {
                continue;
            }
            let rendered = self.render_filter(&nodes, index, node.filter, &mut params)?;
            clauses.push((rendered, node.filter.has_connective()));
        }
        if !clauses.is_empty() {
            let grouped = clauses.len() > 1;
            let clauses: Vec<String> = clauses
                .into_iter()
                .map(|(clause, connective)| {
                    if grouped && connective {
                        format!("({clause})")
                    } else {
                        clause
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut order = Vec::new();
        for index in 0..nodes.len() {
            order.extend(self.order_terms(&nodes, index)?);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if page == Page::None {
            sql.push_str(&self.paging(query.limit, query.offset));
        }

        tracing::trace!(sql = %sql, params = params.len(), nodes = nodes.len(), "compiled query");

        Ok(CompiledQuery {
            sql,
            params,
            nodes: compiled_nodes,
            width,
        })
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn table_name(&self, entity: EntityId) -> String {
        qualify_table(
            self.options.schema.as_deref(),
            self.registry.structure(entity).table(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn plan<'q>(
        &mut self,
        nodes: &mut Vec<PlannedNode<'q>>,
        entity: EntityId,
        parent: Option<usize>,
        relation: Option<Relation>,
        filter: &'q Filter,
        order: &'q [OrderBy],
        joins: &'q [Join],
    ) -> Result<()> {
        let link_alias = match relation.as_ref().map(|r| &r.kind) {
            Some(RelationKind::Association { .. }) => Some(self.alias()),
            _ => None,
        };

        let structure = self.registry.structure(entity);
        let mut tables = vec![(entity, self.alias())];
        for level in structure.parents() {
            tables.push((*level, self.alias()));
        }
        let level_count = tables.len();
        for implementation in structure.implementations() {
            tables.push((implementation.entity, self.alias()));
        }

        let anchor = match relation.as_ref().map(|r| &r.kind) {
            Some(RelationKind::Children { back_reference }) => back_reference.entity,
            _ => entity,
        };

        let index = nodes.len();
        nodes.push(PlannedNode {
            entity,
            parent,
            relation,
            filter,
            order,
            tables,
            level_count,
            anchor,
            link_alias,
        });

        for join in joins {
            let relation = self
                .registry
                .find_relation(entity, &join.relation)
                .cloned()
                .ok_or_else(|| {
                    Error::Build(
                        BuildError {
                            kind: BuildErrorKind::UnknownRelation,
                            entity: None,
                            column: None,
                            message: format!("no relation named '{}'", join.relation),
                        }
                        .with_entity(structure.name()),
                    )
                })?;
            self.plan(
                nodes,
                relation.target,
                Some(index),
                Some(relation),
                &join.filter,
                &join.order,
                &join.joins,
            )?;
        }
        Ok(())
    }

    fn projection(&self, nodes: &[PlannedNode<'_>]) -> (Vec<String>, Vec<CompiledNode>) {
        let mut columns = Vec::new();
        let mut compiled = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut blocks = Vec::with_capacity(node.tables.len());
            for (table, alias) in &node.tables {
                let structure = self.registry.structure(*table);
                let projection = structure.projection();
                let offset = columns.len();
                columns.extend(
                    projection
                        .iter()
                        .map(|&i| format!("{alias}.{}", structure.columns()[i].name)),
                );
                blocks.push(ProjectionBlock {
                    entity: *table,
                    alias: alias.clone(),
                    offset,
                    columns: projection,
                });
            }
            compiled.push(CompiledNode {
                entity: node.entity,
                parent: node.parent,
                relation: node.relation.as_ref().map(|r| r.name.clone()),
                blocks,
            });
        }
        (columns, compiled)
    }

    /// Joins of a node's non-anchor levels and implementation tables.
    fn level_joins(&self, node: &PlannedNode<'_>, primary: bool) -> String {
        let keyword = if primary { "INNER JOIN" } else { "LEFT JOIN" };
        let anchor = self.registry.structure(node.anchor);
        let anchor_alias = node.alias_of(node.anchor).unwrap_or_default();
        let mut sql = String::new();

        for (table, alias) in &node.tables[..node.level_count] {
            if *table == node.anchor {
                continue;
            }
            let structure = self.registry.structure(*table);
            sql.push_str(&format!(
                " {keyword} {} {alias} ON {alias}.{} = {anchor_alias}.{}",
                self.table_name(*table),
                structure.primary_key_name(),
                anchor.primary_key_name()
            ));
        }

        let own = self.registry.structure(node.entity);
        for (implementation, (table, alias)) in own
            .implementations()
            .iter()
            .zip(&node.tables[node.level_count..])
        {
            let structure = self.registry.structure(*table);
            sql.push_str(&format!(
                " LEFT JOIN {} {alias} ON {alias}.{} = {}.{}",
                self.table_name(*table),
                structure.primary_key_name(),
                node.own_alias(),
                own.columns()[implementation.link_column].name
            ));
        }
        sql
    }

    /// The join that reaches `node` from its parent node.
    fn relation_join(&self, nodes: &[PlannedNode<'_>], node: &PlannedNode<'_>) -> String {
        let (Some(relation), Some(parent)) = (node.relation.as_ref(), node.parent) else {
            return String::new();
        };
        let owner = self.registry.structure(relation.owner);
        let owner_alias = nodes[parent].alias_of(relation.owner).unwrap_or_default();
        let anchor = self.registry.structure(node.anchor);
        let anchor_alias = node.alias_of(node.anchor).unwrap_or_default();
        let anchor_table = self.table_name(node.anchor);

        match &relation.kind {
            RelationKind::Reference { column } => format!(
                " LEFT JOIN {anchor_table} {anchor_alias} ON {anchor_alias}.{} = {owner_alias}.{}",
                anchor.primary_key_name(),
                owner.columns()[*column].name
            ),
            RelationKind::Children { back_reference } => format!(
                " LEFT JOIN {anchor_table} {anchor_alias} ON {anchor_alias}.{} = {owner_alias}.{}",
                self.registry.structure(back_reference.entity).columns()[back_reference.index]
                    .name,
                owner.primary_key_name()
            ),
            RelationKind::Association {
                table,
                source_column,
                target_column,
            } => {
                let link = node.link_alias.as_deref().unwrap_or_default();
                format!(
                    " LEFT JOIN {} {link} ON {link}.{source_column} = {owner_alias}.{} \
                     LEFT JOIN {anchor_table} {anchor_alias} ON {anchor_alias}.{} = {link}.{target_column}",
                    qualify_table(self.options.schema.as_deref(), table),
                    owner.primary_key_name(),
                    anchor.primary_key_name()
                )
            }
        }
    }

    fn paging(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (None, Some(offset)) => match self.options.dialect {
                Dialect::Question => format!(" LIMIT -1 OFFSET {offset}"),
                Dialect::Numbered => format!(" OFFSET {offset}"),
            },
        }
    }

    /// Explicit ordering of one node followed by its primary key, which keeps
    /// the rows of one entity contiguous for the materializer.
    fn order_terms(
        &self,
        nodes: &[PlannedNode<'_>],
        index: usize,
    ) -> Result<Vec<String>> {
        let node = &nodes[index];
        let mut terms = Vec::with_capacity(node.order.len() + 1);
        let mut seen = Vec::with_capacity(node.order.len());
        for order in node.order {
            let resolved = self.resolve(nodes, index, order.column())?;
            terms.push(format!("{} {}", resolved.sql, order.direction().as_sql()));
            seen.push(resolved.sql);
        }
        let key = self.primary_key_of(node);
        if !seen.contains(&key) {
            terms.push(key);
        }
        Ok(terms)
    }

    fn primary_key_of(&self, node: &PlannedNode<'_>) -> String {
        format!(
            "{}.{}",
            node.own_alias(),
            self.registry.structure(node.entity).primary_key_name()
        )
    }

    /// GROUP BY and ORDER BY terms that page primary keys over the full join.
    /// A joined ordering column is aggregated per primary entity.
    fn page_order(&self, nodes: &[PlannedNode<'_>]) -> Result<(Vec<String>, Vec<String>)> {
        let key = self.primary_key_of(&nodes[0]);
        let mut group = vec![key.clone()];
        let mut terms = Vec::with_capacity(nodes[0].order.len() + 1);
        for order in nodes[0].order {
            let resolved = self.resolve(nodes, 0, order.column())?;
            let direction = order.direction();
            let term = if resolved.node == 0 {
                if !group.contains(&resolved.sql) {
                    group.push(resolved.sql.clone());
                }
                resolved.sql
            } else {
                match direction {
                    OrderDirection::Asc => format!("MIN({})", resolved.sql),
                    OrderDirection::Desc => format!("MAX({})", resolved.sql),
                }
            };
            terms.push(format!("{term} {}", direction.as_sql()));
        }
        if !terms.iter().any(|t| t.starts_with(&format!("{key} "))) {
            terms.push(key);
        }
        Ok((group, terms))
    }

    /// Whether the primary filter or ordering names a column of a joined node.
    fn primary_reaches_joins(&self, nodes: &[PlannedNode<'_>]) -> Result<bool> {
        for order in nodes[0].order {
            if self.resolve(nodes, 0, order.column())?.node != 0 {
                return Ok(true);
            }
        }
        self.filter_reaches_joins(nodes, nodes[0].filter)
    }

    fn filter_reaches_joins(&self, nodes: &[PlannedNode<'_>], filter: &Filter) -> Result<bool> {
        for entity in filter.entities() {
            let joined = match entity {
                FilterEntity::Column(name) => self.resolve(nodes, 0, name)?.node != 0,
                FilterEntity::Filter(nested) => self.filter_reaches_joins(nodes, nested)?,
                FilterEntity::Operator(_) | FilterEntity::Parameter(_) => false,
            };
            if joined {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolve a column name to `alias.column`.
    ///
    /// `relation.field` addresses the first node joined through `relation`.
    /// A bare field is looked up on the owning node first, then on the other
    /// nodes in alias order.
    fn resolve(&self, nodes: &[PlannedNode<'_>], owner: usize, column: &str) -> Result<Resolved> {
        let owner_name = self.registry.structure(nodes[owner].entity).name();
        let unknown = || {
            Error::Build(
                BuildError {
                    kind: BuildErrorKind::UnknownColumn,
                    entity: None,
                    column: None,
                    message: "column is not reachable from the query".to_string(),
                }
                .with_entity(owner_name)
                .with_column(column),
            )
        };

        if let Some((relation, field)) = column.split_once('.') {
            let node = nodes
                .iter()
                .position(|n| n.relation.as_ref().is_some_and(|r| r.name == relation))
                .ok_or_else(|| {
                    Error::Build(
                        BuildError {
                            kind: BuildErrorKind::UnknownRelation,
                            entity: None,
                            column: None,
                            message: format!("relation '{}' is not joined", relation),
                        }
                        .with_entity(owner_name)
                        .with_column(column),
                    )
                })?;
            return self.resolve_in(nodes, node, field).ok_or_else(unknown);
        }

        std::iter::once(owner)
            .chain((0..nodes.len()).filter(|&i| i != owner))
            .find_map(|i| self.resolve_in(nodes, i, column))
            .ok_or_else(unknown)
    }

    fn resolve_in(&self, nodes: &[PlannedNode<'_>], index: usize, field: &str) -> Option<Resolved> {
        let node = &nodes[index];
        let (table, column) = match self.registry.find_column(node.entity, field) {
            Some(position) => (position.entity, position.index),
            None => self
                .registry
                .structure(node.entity)
                .implementations()
                .iter()
                .find_map(|implementation| {
                    self.registry
                        .structure(implementation.entity)
                        .column_index(field)
                        .map(|i| (implementation.entity, i))
                })?,
        };
        let alias = node.alias_of(table)?;
        let column = self.registry.structure(table).column(column)?;
        Some(Resolved {
            sql: format!("{alias}.{}", column.name),
            column_type: column.column_type,
            node: index,
        })
    }

    /// Render one filter tree, appending its parameters in encounter order.
    fn render_filter(
        &self,
        nodes: &[PlannedNode<'_>],
        owner: usize,
        filter: &Filter,
        params: &mut Vec<CompiledParam>,
    ) -> Result<String> {
        let malformed = |message: String| {
            Error::Build(
                BuildError {
                    kind: BuildErrorKind::MalformedFilter,
                    entity: None,
                    column: None,
                    message,
                }
                .with_entity(self.registry.structure(nodes[owner].entity).name()),
            )
        };

        let mut parts: Vec<String> = Vec::with_capacity(filter.entities().len());
        let mut expect = Expect::Term;
        let mut negated = false;
        let mut column_type = None;
        let mut connective: Option<Operator> = None;

        for entity in filter.entities() {
            expect = match (expect, entity) {
                (Expect::Term, FilterEntity::Column(name)) => {
                    let resolved = self.resolve(nodes, owner, name)?;
                    column_type = Some(resolved.column_type);
                    parts.push(resolved.sql);
                    negated = false;
                    Expect::Operator
                }
                (Expect::Term, FilterEntity::Operator(Operator::Not)) => {
                    parts.push(Operator::Not.as_sql().to_string());
                    negated = true;
                    Expect::Term
                }
                (Expect::Term, FilterEntity::Filter(nested)) => {
                    if nested.is_empty() {
                        return Err(malformed("empty nested filter".to_string()));
                    }
                    let inner = self.render_filter(nodes, owner, nested, params)?;
                    if negated || nested.has_connective() {
                        parts.push(format!("({inner})"));
                    } else {
                        parts.push(inner);
                    }
                    negated = false;
                    Expect::Connective
                }
                (Expect::Operator, FilterEntity::Operator(op)) if op.takes_parameter() => {
                    parts.push(op.as_sql().to_string());
                    Expect::Parameter
                }
                (Expect::Operator, FilterEntity::Operator(op)) if op.is_null_check() => {
                    parts.push(op.as_sql().to_string());
                    Expect::Connective
                }
                (Expect::Parameter, FilterEntity::Parameter(param)) => {
                    let column_type = column_type
                        .ok_or_else(|| malformed("parameter without a column".to_string()))?;
                    params.push(match param {
                        Param::Value(value) => CompiledParam::Value(column_type.encode(value)?),
                        Param::Slot(index) => CompiledParam::Slot {
                            index: *index,
                            column_type,
                        },
                    });
                    parts.push(self.options.dialect.placeholder(params.len()));
                    Expect::Connective
                }
                (Expect::Connective, FilterEntity::Operator(op)) if op.is_connective() => {
                    // Left to right: a change of connective closes the group so far.
                    if connective.is_some_and(|previous| previous != *op) {
                        let group = format!("({})", parts.join(" "));
                        parts.clear();
                        parts.push(group);
                    }
                    connective = Some(*op);
                    parts.push(op.as_sql().to_string());
                    Expect::Term
                }
                (_, other) => {
                    return Err(malformed(format!("unexpected token {:?}", other)));
                }
            };
        }

        if expect != Expect::Connective {
            return Err(malformed("filter ends before its last term is complete".to_string()));
        }
        Ok(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::OrderBy;
    use crate::query::Query;
    use relgraph_core::{Column, EntityDescriptor};
    use std::sync::Arc;

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .entity(
                EntityDescriptor::new("Person", "person")
                    .column(Column::primary("id"))
                    .column(Column::new("name", ColumnType::Text))
                    .column(Column::new("age", ColumnType::Integer).nullable()),
            )
            .entity(
                EntityDescriptor::new("Hero", "hero")
                    .column(Column::primary("id"))
                    .column(Column::new("alias", ColumnType::Text))
                    .column(Column::reference("team_id", "Team"))
                    .parent("Person")
                    .reference("team", "team_id")
                    .association("powers", "Power", "hero_power", "hero_id", "power_id")
                    .children("missions", "Mission", "hero_id"),
            )
            .entity(
                EntityDescriptor::new("Team", "team")
                    .column(Column::primary("id"))
                    .column(Column::new("name", ColumnType::Text))
                    .children("members", "Hero", "team_id"),
            )
            .entity(
                EntityDescriptor::new("Power", "power")
                    .column(Column::primary("id"))
                    .column(Column::new("label", ColumnType::Text)),
            )
            .entity(
                EntityDescriptor::new("Mission", "mission")
                    .column(Column::primary("id"))
                    .column(Column::new("title", ColumnType::Text))
                    .column(Column::reference("hero_id", "Hero")),
            )
            .build()
            .unwrap()
    }

    fn compile(registry: &ModelRegistry, query: &Query) -> Result<Arc<CompiledQuery>> {
        query.compile(registry, &CompileOptions::default())
    }

    fn id(registry: &ModelRegistry, name: &str) -> EntityId {
        registry.entity_id(name).unwrap()
    }

    fn build_kind(err: Error) -> BuildErrorKind {
        match err {
            Error::Build(e) => e.kind,
            other => panic!("expected build error, got {other}"),
        }
    }

    #[test]
    fn test_single_table() {
        let r = registry();
        let q = Query::new(id(&r, "Team")).filter(Filter::new().is("name", "Avengers"));
        let c = compile(&r, &q).unwrap();
        assert_eq!(
            c.sql(),
            "SELECT t0.id, t0.name FROM team t0 WHERE t0.name = ? ORDER BY t0.id"
        );
        assert_eq!(c.params(), &[CompiledParam::Value(Value::Text("Avengers".into()))]);
        assert_eq!(c.width(), 2);
    }

    #[test]
    fn test_parameter_count_matches_value_comparisons() {
        let r = registry();
        let filter = Filter::new()
            .is("name", "a")
            .is_null("age")
            .like("name", "%b%")
            .not_null("name")
            .between("age", 10, 20)
            .or(Filter::new().less_than_equal("age", 3));
        let expected = filter.parameter_count();
        let c = compile(&r, &Query::new(id(&r, "Person")).filter(filter)).unwrap();
        assert_eq!(expected, 5);
        assert_eq!(c.parameter_count(), expected);
        assert_eq!(c.sql().matches('?').count(), expected);
    }

    #[test]
    fn test_between_upper_bound_is_exclusive() {
        let r = registry();
        let q = Query::new(id(&r, "Person")).filter(Filter::new().between("age", 18, 30));
        let c = compile(&r, &q).unwrap();
        assert!(c.sql().contains("WHERE (t0.age >= ? AND t0.age < ?)"), "{}", c.sql());
        assert_eq!(
            c.params(),
            &[
                CompiledParam::Value(Value::Int(18)),
                CompiledParam::Value(Value::Int(30))
            ]
        );
    }

    #[test]
    fn test_nested_filters_are_parenthesized() {
        let r = registry();
        let filter = Filter::new()
            .is("name", "a")
            .and(Filter::new().is("age", 1).or(Filter::new().is("age", 2)))
            .and(Filter::new().is("name", "b").invert());
        let c = compile(&r, &Query::new(id(&r, "Person")).filter(filter)).unwrap();
        assert!(
            c.sql().contains(
                "WHERE t0.name = ? AND (t0.age = ? OR t0.age = ?) AND NOT (t0.name = ?)"
            ),
            "{}",
            c.sql()
        );
    }

    #[test]
    fn test_inheritance_joins_parent_levels() {
        let r = registry();
        let q = Query::new(id(&r, "Hero")).filter(Filter::new().like("name", "T%"));
        let c = compile(&r, &q).unwrap();
        assert_eq!(
            c.sql(),
            "SELECT t0.id, t0.alias, t0.team_id, t1.id, t1.name, t1.age \
             FROM hero t0 INNER JOIN person t1 ON t1.id = t0.id \
             WHERE t1.name LIKE ? ORDER BY t0.id"
        );
        let node = &c.layout()[0];
        assert_eq!(node.blocks.len(), 2);
        assert_eq!(node.identity_block().unwrap().offset, 0);
        assert_eq!(node.blocks[1].offset, 3);
    }

    #[test]
    fn test_many_to_many_uses_intermediate_alias_without_projection() {
        let r = registry();
        let q = Query::new(id(&r, "Hero")).join(Join::new("powers"));
        let c = compile(&r, &q).unwrap();
        assert!(
            c.sql().contains(
                "LEFT JOIN hero_power t2 ON t2.hero_id = t0.id \
                 LEFT JOIN power t3 ON t3.id = t2.power_id"
            ),
            "{}",
            c.sql()
        );
        assert!(!c.sql().contains("t2.hero_id,"));
        assert!(c.sql().ends_with("ORDER BY t0.id, t3.id"));
        assert_eq!(c.layout().len(), 2);
        assert_eq!(c.layout()[1].relation.as_deref(), Some("powers"));
        assert_eq!(c.layout()[1].parent, Some(0));
    }

    #[test]
    fn test_repeated_entity_gets_distinct_aliases() {
        let r = registry();
        let q = Query::new(id(&r, "Team"))
            .join(Join::new("members").join(Join::new("team").filter(Filter::new().is("name", "X"))));
        let c = compile(&r, &q).unwrap();
        assert!(c.sql().contains("FROM team t0"));
        assert!(c.sql().contains("LEFT JOIN hero t1 ON t1.team_id = t0.id"));
        assert!(c.sql().contains("LEFT JOIN person t2 ON t2.id = t1.id"));
        assert!(c.sql().contains("LEFT JOIN team t3 ON t3.id = t1.team_id"));
        // The join's own filter resolves to its own alias first.
        assert!(c.sql().contains("WHERE t3.name = ?"), "{}", c.sql());
    }

    #[test]
    fn test_qualified_column_addresses_joined_node() {
        let r = registry();
        let q = Query::new(id(&r, "Hero"))
            .join(Join::new("missions"))
            .filter(Filter::new().is("missions.title", "Rescue"));
        let c = compile(&r, &q).unwrap();
        assert!(c.sql().contains("WHERE t2.title = ?"), "{}", c.sql());
    }

    #[test]
    fn test_join_with_limit_wraps_primary_table() {
        let r = registry();
        let q = Query::new(id(&r, "Hero"))
            .filter(Filter::new().like("name", "%a%"))
            .join(Join::new("missions").filter(Filter::new().not_null("title")))
            .order_by(OrderBy::desc("alias"))
            .limit(5)
            .offset(10);
        let c = compile(&r, &q).unwrap();
        assert!(
            c.sql().contains(
                "FROM (SELECT t0.* FROM hero t0 INNER JOIN person t1 ON t1.id = t0.id \
                 WHERE t1.name LIKE ? ORDER BY t0.alias DESC, t0.id LIMIT 5 OFFSET 10) t0 \
                 INNER JOIN person t1 ON t1.id = t0.id \
                 LEFT JOIN mission t2 ON t2.hero_id = t0.id"
            ),
            "{}",
            c.sql()
        );
        assert!(c.sql().contains("WHERE t2.title IS NOT NULL"));
        assert!(!c.sql().ends_with("OFFSET 10"));
        assert_eq!(c.parameter_count(), 1);
    }

    #[test]
    fn test_limit_without_joins_is_plain() {
        let r = registry();
        let c = compile(&r, &Query::new(id(&r, "Team")).limit(3)).unwrap();
        assert!(c.sql().ends_with("ORDER BY t0.id LIMIT 3"));
        let c = compile(&r, &Query::new(id(&r, "Team")).offset(4)).unwrap();
        assert!(c.sql().ends_with("LIMIT -1 OFFSET 4"));
    }

    #[test]
    fn test_limited_join_query_pages_keys_when_primary_filter_reaches_a_join() {
        let r = registry();
        let q = Query::new(id(&r, "Hero"))
            .join(Join::new("missions"))
            .filter(Filter::new().is("missions.title", "Rescue"))
            .limit(2);
        let c = compile(&r, &q).unwrap();
        let joins = "FROM hero t0 INNER JOIN person t1 ON t1.id = t0.id \
                     LEFT JOIN mission t2 ON t2.hero_id = t0.id";
        assert!(
            c.sql().contains(&format!(
                "{joins} WHERE t0.id IN (SELECT t0.id {joins} WHERE t2.title = ? \
                 GROUP BY t0.id ORDER BY t0.id LIMIT 2) AND t2.title = ? ORDER BY t0.id, t2.id"
            )),
            "{}",
            c.sql()
        );
        assert_eq!(c.parameter_count(), 2);
    }

    #[test]
    fn test_limited_join_query_orders_keys_by_aggregated_join_column() {
        let r = registry();
        let q = Query::new(id(&r, "Hero"))
            .join(Join::new("missions"))
            .order_by(OrderBy::desc("missions.title"))
            .order_by(OrderBy::asc("name"))
            .offset(3)
            .limit(2);
        let c = compile(&r, &q).unwrap();
        assert!(
            c.sql().contains(
                "GROUP BY t0.id, t1.name ORDER BY MAX(t2.title) DESC, t1.name ASC, t0.id \
                 LIMIT 2 OFFSET 3)"
            ),
            "{}",
            c.sql()
        );
        assert!(!c.sql().contains("FROM (SELECT"));
    }

    #[test]
    fn test_connective_change_groups_left_to_right() {
        let r = registry();
        let filter = Filter::new()
            .is("age", 1)
            .or(Filter::new().is("age", 2))
            .is("name", "nope");
        let c = compile(&r, &Query::new(id(&r, "Person")).filter(filter)).unwrap();
        assert!(
            c.sql().contains("WHERE (t0.age = ? OR t0.age = ?) AND t0.name = ?"),
            "{}",
            c.sql()
        );

        let filter = Filter::new()
            .is("age", 1)
            .is("name", "a")
            .or(Filter::new().is("age", 2))
            .is("name", "b");
        let c = compile(&r, &Query::new(id(&r, "Person")).filter(filter)).unwrap();
        assert!(
            c.sql().contains(
                "WHERE ((t0.age = ? AND t0.name = ?) OR t0.age = ?) AND t0.name = ?"
            ),
            "{}",
            c.sql()
        );
    }

    #[test]
    fn test_unknown_column_and_relation() {
        let r = registry();
        let err = compile(
            &r,
            &Query::new(id(&r, "Team")).filter(Filter::new().is("budget", 1)),
        )
        .unwrap_err();
        assert_eq!(build_kind(err), BuildErrorKind::UnknownColumn);

        let err = compile(&r, &Query::new(id(&r, "Team")).join(Join::new("villains"))).unwrap_err();
        assert_eq!(build_kind(err), BuildErrorKind::UnknownRelation);
    }

    #[test]
    fn test_malformed_filter() {
        let r = registry();
        let filter = Filter::from_entities(vec![
            FilterEntity::Column("name".into()),
            FilterEntity::Operator(Operator::And),
        ]);
        let err = compile(&r, &Query::new(id(&r, "Team")).filter(filter)).unwrap_err();
        assert_eq!(build_kind(err), BuildErrorKind::MalformedFilter);

        let dangling = Filter::from_entities(vec![
            FilterEntity::Column("name".into()),
            FilterEntity::Operator(Operator::IsNull),
            FilterEntity::Parameter(Param::Value(Value::Null)),
        ]);
        let err = compile(&r, &Query::new(id(&r, "Team")).filter(dangling)).unwrap_err();
        assert_eq!(build_kind(err), BuildErrorKind::MalformedFilter);
    }

    #[test]
    fn test_bind_fills_slots_in_order() {
        let r = registry();
        let q = Query::new(id(&r, "Person"))
            .filter(Filter::new().is_slot("name", 1).is("age", 7).is_slot("name", 0));
        let c = compile(&r, &q).unwrap();
        assert_eq!(c.slot_count(), 2);
        let bound = c.bind(&["first".into(), "second".into()]).unwrap();
        assert_eq!(
            bound,
            vec![Value::from("second"), Value::Int(7), Value::from("first")]
        );
        let err = c.bind(&["only".into()]).unwrap_err();
        assert_eq!(build_kind(err), BuildErrorKind::UnboundParameter);
    }

    #[test]
    fn test_schema_and_numbered_placeholders() {
        let r = registry();
        let q = Query::new(id(&r, "Hero"))
            .filter(Filter::new().is("alias", "a").is("name", "b"))
            .join(Join::new("powers"));
        let options = CompileOptions::default().dialect(Dialect::Numbered).schema("main");
        let c = q.compile(&r, &options).unwrap();
        assert!(c.sql().contains("FROM main.hero t0 INNER JOIN main.person t1"));
        assert!(c.sql().contains("LEFT JOIN main.hero_power t2"));
        assert!(c.sql().contains("t0.alias = $1 AND t1.name = $2"), "{}", c.sql());
    }
}
