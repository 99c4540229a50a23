//! Result rows handed back by a transport.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    /// Originating table per column, when the transport reports it
    tables: Vec<Option<String>>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create column info from result column names.
    ///
    /// When two columns share a name (joined tables both projecting `id`),
    /// name lookup resolves to the first one.
    pub fn new(names: Vec<String>) -> Self {
        let tables = vec![None; names.len()];
        Self::with_tables(names, tables)
    }

    /// Create column info with the table each column was read from.
    pub fn with_tables(names: Vec<String>, tables: Vec<Option<String>>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
        }
        Self {
            names,
            tables,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Index of the column `name` read from `table`.
    pub fn index_of_qualified(&self, table: &str, name: &str) -> Option<usize> {
        self.names
            .iter()
            .zip(&self.tables)
            .position(|(n, t)| n == name && t.as_deref() == Some(table))
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn table_at(&self, index: usize) -> Option<&str> {
        self.tables.get(index).and_then(|t| t.as_deref())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
///
/// Column metadata is shared via `Arc` by all rows of one result.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row with its own column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a value by table and column name.
    pub fn get_qualified(&self, table: &str, name: &str) -> Option<&Value> {
        self.columns
            .index_of_qualified(table, name)
            .and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_position_and_name() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "id".into()],
            vec![Value::BigInt(1), "Avengers".into(), Value::BigInt(9)],
        );
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(2), Some(&Value::BigInt(9)));
        assert_eq!(row.get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_qualified_lookup() {
        let info = Arc::new(ColumnInfo::with_tables(
            vec!["id".into(), "id".into()],
            vec![Some("hero".into()), Some("team".into())],
        ));
        let row = Row::with_columns(Arc::clone(&info), vec![Value::BigInt(1), Value::BigInt(2)]);
        assert_eq!(row.get_qualified("team", "id"), Some(&Value::BigInt(2)));
        assert_eq!(row.get_qualified("power", "id"), None);
        assert_eq!(info.table_at(0), Some("hero"));
    }
}
