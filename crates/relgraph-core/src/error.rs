//! Error types for relgraph operations.

use std::fmt;

/// The primary error type for all relgraph operations.
#[derive(Debug)]
pub enum Error {
    /// Inconsistent metadata detected while building the model registry
    Schema(SchemaError),
    /// Query or filter construction errors, raised before any I/O
    Build(BuildError),
    /// Transport/execution errors
    Database(DatabaseError),
    /// Mutation of a locked instance
    Locked(LockedError),
    /// Type conversion errors
    Type(TypeError),
    /// Misuse of a session (unknown handles, wrong relation kind, tx state)
    Session(SessionError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub entity: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Two columns of one entity share a name
    DuplicateColumn,
    /// Two entities share a name or a table
    DuplicateEntity,
    /// A table, column or entity name is not a plain SQL identifier
    InvalidIdentifier,
    /// No column is tagged as primary key
    MissingPrimaryKey,
    /// More than one column is tagged as primary key
    MultiplePrimaryKeys,
    /// A parent, reference or relation names an unregistered entity
    UnknownEntity,
    /// A relation, link or sequence names a column the entity does not have
    UnknownColumn,
    /// The parent chain loops back on itself
    HierarchyCycle,
    /// A relation descriptor is inconsistent with its columns
    InvalidRelation,
}

#[derive(Debug)]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub entity: Option<String>,
    pub column: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// A query names an entity the registry does not know
    UnknownEntity,
    /// A filter or ordering references a column outside the accessible aliases
    UnknownColumn,
    /// A join names a relation the entity does not declare
    UnknownRelation,
    /// A filter token sequence cannot be rendered
    MalformedFilter,
    /// A parameter slot was left without a value at bind time
    UnboundParameter,
}

#[derive(Debug)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// The database is busy or locked by another connection
    Busy,
    /// Syntax error or unknown table/column in SQL
    Syntax,
    /// Failed to open or lost the connection
    Connection,
    /// Other database error
    Other,
}

#[derive(Debug)]
pub struct LockedError {
    pub entity: String,
    pub column: String,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The instance handle does not belong to this session
    UnknownInstance,
    /// The relation exists but has a different kind than the call expects
    RelationKind,
    /// The instance must be persisted before this operation
    NotPersisted,
    /// Commit or rollback without an open transaction
    NoTransaction,
}

impl Error {
    /// Shorthand for a schema error on one entity.
    pub fn schema(kind: SchemaErrorKind, entity: &str, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            entity: Some(entity.to_string()),
            message: message.into(),
        })
    }

    /// Shorthand for a build error.
    pub fn build(kind: BuildErrorKind, message: impl Into<String>) -> Self {
        Error::Build(BuildError {
            kind,
            entity: None,
            column: None,
            message: message.into(),
        })
    }

    /// Shorthand for a session error.
    pub fn session(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Error::Session(SessionError {
            kind,
            message: message.into(),
        })
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Database(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the statement text to a database error that does not carry one yet.
    pub fn with_sql(mut self, sql: &str) -> Self {
        if let Error::Database(e) = &mut self {
            if e.sql.is_none() {
                e.sql = Some(sql.to_string());
            }
        }
        self
    }

    /// Is this a constraint violation reported by the database?
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Database(e) if e.kind == DatabaseErrorKind::Constraint)
    }

    /// Is this a transient busy/locked condition worth retrying?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(e) if e.kind == DatabaseErrorKind::Busy)
    }
}

impl BuildError {
    pub fn with_entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Build(e) => write!(f, "Query build error: {}", e),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Locked(e) => write!(f, "Locked instance: {}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Session(e) => write!(f, "Session error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{}: {}", entity, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity, &self.column) {
            (Some(entity), Some(column)) => {
                write!(f, "{}.{}: {}", entity, column, self.message)
            }
            (Some(entity), None) => write!(f, "{}: {}", entity, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sql) = &self.sql {
            write!(f, "{} (while executing `{}`)", self.message, sql)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for LockedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot set '{}' on a locked {} instance",
            self.column, self.entity
        )
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<BuildError> for Error {
    fn from(err: BuildError) -> Self {
        Error::Build(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<LockedError> for Error {
    fn from(err: LockedError) -> Self {
        Error::Locked(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_exposes_sql() {
        let err = Error::Database(DatabaseError {
            kind: DatabaseErrorKind::Constraint,
            sql: Some("INSERT INTO hero (name) VALUES (?)".to_string()),
            message: "UNIQUE constraint failed: hero.name".to_string(),
            source: None,
        });

        assert_eq!(err.sql(), Some("INSERT INTO hero (name) VALUES (?)"));
        assert!(err.is_constraint_violation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn test_with_sql_keeps_existing_statement() {
        let err = Error::Database(DatabaseError {
            kind: DatabaseErrorKind::Busy,
            sql: None,
            message: "database is locked".to_string(),
            source: None,
        })
        .with_sql("UPDATE team SET name = ? WHERE id = ?")
        .with_sql("SELECT 1");

        assert_eq!(err.sql(), Some("UPDATE team SET name = ? WHERE id = ?"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_build_error_display_names_column() {
        let err: Error = BuildError {
            kind: BuildErrorKind::UnknownColumn,
            entity: None,
            column: None,
            message: "column is not reachable from the query".to_string(),
        }
        .with_entity("Hero")
        .with_column("budget")
        .into();

        assert_eq!(
            err.to_string(),
            "Query build error: Hero.budget: column is not reachable from the query"
        );
        assert!(err.sql().is_none());
    }

    #[test]
    fn test_locked_error_display() {
        let err = Error::Locked(LockedError {
            entity: "Team".to_string(),
            column: "name".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Locked instance: cannot set 'name' on a locked Team instance"
        );
    }
}
