//! INSERT, UPDATE and DELETE statements for raw rows and association links.

use relgraph_core::{ModelRow, ModelStructure, Result, Value, qualify_table};
use relgraph_query::CompileOptions;

fn table(structure: &ModelStructure, options: &CompileOptions) -> String {
    qualify_table(options.schema.as_deref(), structure.table())
}

fn placeholders(options: &CompileOptions, from: usize, count: usize) -> Vec<String> {
    (from..from + count)
        .map(|i| options.dialect.placeholder(i))
        .collect()
}

/// INSERT every column of `row`.
///
/// The primary key is left to the database unless `explicit_id` is given,
/// which is how inheritance levels below the root reuse the root's id.
pub(crate) fn insert_row(
    structure: &ModelStructure,
    row: &ModelRow,
    explicit_id: Option<i64>,
    options: &CompileOptions,
) -> Result<(String, Vec<Value>)> {
    let mut columns = Vec::with_capacity(structure.column_count());
    let mut values = Vec::with_capacity(structure.column_count());
    for (index, column) in structure.columns().iter().enumerate() {
        if index == structure.primary_key() {
            if let Some(id) = explicit_id {
                columns.push(column.name.as_str());
                values.push(Value::BigInt(id));
            }
            continue;
        }
        let value = row.get(index).unwrap_or(&Value::Null);
        columns.push(column.name.as_str());
        values.push(column.column_type.encode(value)?);
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table(structure, options))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table(structure, options),
            columns.join(", "),
            placeholders(options, 1, values.len()).join(", ")
        )
    };
    Ok((sql, values))
}

/// UPDATE only the modified columns of a persisted row. `None` when no
/// column other than the primary key is marked.
pub(crate) fn update_row(
    structure: &ModelStructure,
    row: &ModelRow,
    options: &CompileOptions,
) -> Result<Option<(String, Vec<Value>)>> {
    let Some(id) = row.id() else {
        return Ok(None);
    };
    let mut assignments = Vec::new();
    let mut values = Vec::new();
    for index in row.modified_columns() {
        if index == structure.primary_key() {
            continue;
        }
        let Some(column) = structure.column(index) else {
            continue;
        };
        values.push(column.column_type.encode(row.get(index).unwrap_or(&Value::Null))?);
        assignments.push(format!(
            "{} = {}",
            column.name,
            options.dialect.placeholder(values.len())
        ));
    }
    if assignments.is_empty() {
        return Ok(None);
    }
    values.push(Value::BigInt(id));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        table(structure, options),
        assignments.join(", "),
        structure.primary_key_name(),
        options.dialect.placeholder(values.len())
    );
    Ok(Some((sql, values)))
}

/// UPDATE one column of one row.
pub(crate) fn update_column(
    structure: &ModelStructure,
    column: usize,
    value: Value,
    id: i64,
    options: &CompileOptions,
) -> (String, Vec<Value>) {
    let name = structure
        .column(column)
        .map_or("", |c| c.name.as_str());
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        table(structure, options),
        name,
        options.dialect.placeholder(1),
        structure.primary_key_name(),
        options.dialect.placeholder(2)
    );
    (sql, vec![value, Value::BigInt(id)])
}

pub(crate) fn delete_row(
    structure: &ModelStructure,
    id: i64,
    options: &CompileOptions,
) -> (String, Vec<Value>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        table(structure, options),
        structure.primary_key_name(),
        options.dialect.placeholder(1)
    );
    (sql, vec![Value::BigInt(id)])
}

/// INSERT one association row.
pub(crate) fn insert_link(
    link_table: &str,
    source_column: &str,
    target_column: &str,
    source: i64,
    target: i64,
    options: &CompileOptions,
) -> (String, Vec<Value>) {
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({})",
        qualify_table(options.schema.as_deref(), link_table),
        source_column,
        target_column,
        placeholders(options, 1, 2).join(", ")
    );
    (sql, vec![Value::BigInt(source), Value::BigInt(target)])
}

/// DELETE one association row.
pub(crate) fn delete_link(
    link_table: &str,
    source_column: &str,
    target_column: &str,
    source: i64,
    target: i64,
    options: &CompileOptions,
) -> (String, Vec<Value>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = {} AND {} = {}",
        qualify_table(options.schema.as_deref(), link_table),
        source_column,
        options.dialect.placeholder(1),
        target_column,
        options.dialect.placeholder(2)
    );
    (sql, vec![Value::BigInt(source), Value::BigInt(target)])
}

/// DELETE every association row whose `column` holds `id`.
pub(crate) fn delete_links(
    link_table: &str,
    column: &str,
    id: i64,
    options: &CompileOptions,
) -> (String, Vec<Value>) {
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualify_table(options.schema.as_deref(), link_table),
        column,
        options.dialect.placeholder(1)
    );
    (sql, vec![Value::BigInt(id)])
}
