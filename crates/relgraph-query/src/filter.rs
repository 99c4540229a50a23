//! Filter expression trees.
//!
//! A [`Filter`] is a flat, ordered sequence of [`FilterEntity`] tokens read
//! left to right: columns, operators, parameters and nested filters. There is
//! no operator precedence. `a OR b AND c` means `(a OR b) AND c`; the compiler
//! parenthesizes whenever the connective changes, and around nested
//! sub-filters that contain one.
//!
//! The comparison helpers (`is`, `less_than`, ...) append a
//! `{column, operator, parameter}` triple, inserting an explicit `AND` token
//! first when the filter already has content.

use relgraph_core::Value;

/// Comparison and boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    IsNull,
    NotNull,
    And,
    Or,
    Not,
}

impl Operator {
    /// SQL text of the operator.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::NotNull => "IS NOT NULL",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Not => "NOT",
        }
    }

    /// Whether a parameter follows this operator.
    pub const fn takes_parameter(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::LtEq
                | Operator::Gt
                | Operator::GtEq
                | Operator::Like
        )
    }

    /// `IS NULL` / `IS NOT NULL`.
    pub const fn is_null_check(self) -> bool {
        matches!(self, Operator::IsNull | Operator::NotNull)
    }

    /// `AND` / `OR`.
    pub const fn is_connective(self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }
}

/// A filter parameter: a value bound now, or a positional slot bound when
/// the compiled query is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    Slot(usize),
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Value(value)
    }
}

/// One token of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEntity {
    /// A column, by field name. `relation.field` addresses a joined node.
    Column(String),
    Operator(Operator),
    Parameter(Param),
    Filter(Filter),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entities: Vec<FilterEntity>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from raw tokens. The sequence is validated at compile
    /// time, not here.
    pub fn from_entities(entities: Vec<FilterEntity>) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> &[FilterEntity] {
        &self.entities
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Append a raw token.
    pub fn push(&mut self, entity: FilterEntity) {
        self.entities.push(entity);
    }

    /// Whether the top level of this filter joins terms with AND/OR.
    pub fn has_connective(&self) -> bool {
        self.entities
            .iter()
            .any(|e| matches!(e, FilterEntity::Operator(op) if op.is_connective()))
    }

    /// Number of parameters, including nested filters.
    pub fn parameter_count(&self) -> usize {
        self.entities
            .iter()
            .map(|e| match e {
                FilterEntity::Parameter(_) => 1,
                FilterEntity::Filter(nested) => nested.parameter_count(),
                _ => 0,
            })
            .sum()
    }

    /// Highest slot index used, plus one.
    pub fn slot_count(&self) -> usize {
        self.entities
            .iter()
            .map(|e| match e {
                FilterEntity::Parameter(Param::Slot(i)) => i + 1,
                FilterEntity::Filter(nested) => nested.slot_count(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    fn join_with_and(&mut self) {
        if !self.entities.is_empty() {
            self.entities.push(FilterEntity::Operator(Operator::And));
        }
    }

    /// Append `column <op> param`, or `column IS [NOT] NULL` for null checks.
    pub fn compare(mut self, column: impl Into<String>, op: Operator, param: Param) -> Self {
        self.join_with_and();
        self.entities.push(FilterEntity::Column(column.into()));
        self.entities.push(FilterEntity::Operator(op));
        if op.takes_parameter() {
            self.entities.push(FilterEntity::Parameter(param));
        }
        self
    }

    /// `column = value`
    pub fn is(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::Eq, Param::Value(value.into()))
    }

    /// `column = ?` with the value supplied at execution from `slot`.
    pub fn is_slot(self, column: impl Into<String>, slot: usize) -> Self {
        self.compare(column, Operator::Eq, Param::Slot(slot))
    }

    /// `column <> value`
    pub fn is_not(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::NotEq, Param::Value(value.into()))
    }

    /// `column IS NULL`
    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.compare(column, Operator::IsNull, Param::Value(Value::Null))
    }

    /// `column IS NOT NULL`
    pub fn not_null(self, column: impl Into<String>) -> Self {
        self.compare(column, Operator::NotNull, Param::Value(Value::Null))
    }

    /// `column LIKE pattern`
    pub fn like(self, column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.compare(column, Operator::Like, Param::Value(pattern.into()))
    }

    /// `column < value`
    pub fn less_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::Lt, Param::Value(value.into()))
    }

    /// `column <= value`
    pub fn less_than_equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::LtEq, Param::Value(value.into()))
    }

    /// `column > value`
    pub fn greater_than(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::Gt, Param::Value(value.into()))
    }

    /// `column >= value`
    pub fn greater_than_equal(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(column, Operator::GtEq, Param::Value(value.into()))
    }

    /// Half-open range: `(column >= low AND column < high)`.
    ///
    /// The upper bound is exclusive, unlike SQL `BETWEEN`. Consecutive ranges
    /// such as `[0, 10)` and `[10, 20)` therefore never overlap.
    pub fn between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        let column = column.into();
        let range = Filter::new()
            .greater_than_equal(column.clone(), low)
            .less_than(column, high);
        self.join_with_and();
        self.entities.push(FilterEntity::Filter(range));
        self
    }

    /// `self AND (other)`. An empty `self` becomes `other`.
    pub fn and(self, other: Filter) -> Self {
        self.connect(Operator::And, other)
    }

    /// `self OR (other)`. An empty `self` becomes `other`.
    pub fn or(self, other: Filter) -> Self {
        self.connect(Operator::Or, other)
    }

    fn connect(mut self, op: Operator, other: Filter) -> Self {
        if self.entities.is_empty() {
            return other;
        }
        if other.entities.is_empty() {
            return self;
        }
        self.entities.push(FilterEntity::Operator(op));
        self.entities.push(FilterEntity::Filter(other));
        self
    }

    /// `NOT (self)` as a new root.
    pub fn invert(self) -> Self {
        if self.entities.is_empty() {
            return self;
        }
        Self {
            entities: vec![
                FilterEntity::Operator(Operator::Not),
                FilterEntity::Filter(self),
            ],
        }
    }
}
