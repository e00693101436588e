use std::collections::BTreeMap;

use rowdeck_core::model::{ColumnName, ForeignKeyDescriptor};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlGenerationError {
    #[error("table name cannot be empty")]
    EmptyTableName,
    #[error("column name cannot be empty")]
    EmptyColumnName,
    #[error("table `{0}` has no columns to select")]
    NoColumns(String),
    #[error("update of `{0}` has no columns to set")]
    NothingToUpdate(String),
}

/// Base-table alias used by the content query; joined tables are `fk0`, `fk1`...
const BASE_ALIAS: &str = "base";

pub const TABLE_COLUMNS_SQL: &str = "SELECT COLUMN_NAME \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

pub const TABLE_FOREIGN_KEYS_SQL: &str =
    "SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
     FROM information_schema.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
       AND REFERENCED_TABLE_NAME IS NOT NULL \
     ORDER BY ORDINAL_POSITION";

/// First character-typed column of a table other than the given one.
pub const DESCRIPTIVE_COLUMN_SQL: &str = "SELECT COLUMN_NAME \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME <> ? \
       AND DATA_TYPE IN ('char', 'varchar', 'tinytext', 'text', 'mediumtext', 'longtext') \
     ORDER BY ORDINAL_POSITION \
     LIMIT 1";

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

fn table_sql(table: &str) -> Result<String, SqlGenerationError> {
    if table.trim().is_empty() {
        return Err(SqlGenerationError::EmptyTableName);
    }
    Ok(quote_identifier(table))
}

fn column_sql(column: &str) -> Result<String, SqlGenerationError> {
    if column.trim().is_empty() {
        return Err(SqlGenerationError::EmptyColumnName);
    }
    Ok(quote_identifier(column))
}

fn qualified(alias: &str, column: &str) -> Result<String, SqlGenerationError> {
    Ok(format!("{}.{}", quote_identifier(alias), column_sql(column)?))
}

#[must_use]
pub fn join_alias(column: &str, referenced_table: &str) -> ColumnName {
    format!("{column}__{referenced_table}")
}

/// Selects every base column plus one joined descriptive column per foreign
/// key, named by its join alias. Rows come back in primary-key order.
pub fn content_select_sql(
    table: &str,
    columns: &[ColumnName],
    foreign_keys: &BTreeMap<ColumnName, ForeignKeyDescriptor>,
) -> Result<String, SqlGenerationError> {
    let table_name = table_sql(table)?;
    let Some(primary_key) = columns.first() else {
        return Err(SqlGenerationError::NoColumns(table.to_string()));
    };

    let mut projection = columns
        .iter()
        .map(|column| qualified(BASE_ALIAS, column))
        .collect::<Result<Vec<_>, _>>()?;
    let mut joins = Vec::with_capacity(foreign_keys.len());

    for (index, (column, foreign_key)) in foreign_keys.iter().enumerate() {
        let alias = format!("fk{index}");
        projection.push(format!(
            "{} AS {}",
            qualified(&alias, &foreign_key.descriptive_column)?,
            column_sql(&foreign_key.join_alias)?
        ));
        joins.push(format!(
            " LEFT JOIN {} AS {} ON {} = {}",
            table_sql(&foreign_key.referenced_table)?,
            quote_identifier(&alias),
            qualified(&alias, &foreign_key.referenced_column)?,
            qualified(BASE_ALIAS, column)?
        ));
    }

    Ok(format!(
        "SELECT {} FROM {} AS {}{} ORDER BY {}",
        projection.join(", "),
        table_name,
        quote_identifier(BASE_ALIAS),
        joins.concat(),
        qualified(BASE_ALIAS, primary_key)?
    ))
}

pub fn foreign_key_options_sql(
    foreign_key: &ForeignKeyDescriptor,
) -> Result<String, SqlGenerationError> {
    Ok(format!(
        "SELECT {} AS `id`, {} AS `display` FROM {} ORDER BY `display`",
        column_sql(&foreign_key.referenced_column)?,
        column_sql(&foreign_key.descriptive_column)?,
        table_sql(&foreign_key.referenced_table)?
    ))
}

/// `INSERT` with one positional parameter per column. No columns inserts a
/// row of defaults.
pub fn insert_sql(table: &str, columns: &[&str]) -> Result<String, SqlGenerationError> {
    let table_name = table_sql(table)?;
    let names = columns
        .iter()
        .map(|column| column_sql(column))
        .collect::<Result<Vec<_>, _>>()?;
    let placeholders = vec!["?"; names.len()];
    Ok(format!(
        "INSERT INTO {table_name} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    ))
}

/// `UPDATE` binding the set columns first and the primary key last.
pub fn update_sql(
    table: &str,
    columns: &[&str],
    primary_key_column: &str,
) -> Result<String, SqlGenerationError> {
    let table_name = table_sql(table)?;
    if columns.is_empty() {
        return Err(SqlGenerationError::NothingToUpdate(table.to_string()));
    }
    let assignments = columns
        .iter()
        .map(|column| column_sql(column).map(|name| format!("{name} = ?")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "UPDATE {table_name} SET {} WHERE {} = ?",
        assignments.join(", "),
        column_sql(primary_key_column)?
    ))
}

pub fn delete_sql(table: &str, primary_key_column: &str) -> Result<String, SqlGenerationError> {
    Ok(format!(
        "DELETE FROM {} WHERE {} = ?",
        table_sql(table)?,
        column_sql(primary_key_column)?
    ))
}

pub fn count_sql(table: &str) -> Result<String, SqlGenerationError> {
    Ok(format!("SELECT COUNT(*) FROM {}", table_sql(table)?))
}
