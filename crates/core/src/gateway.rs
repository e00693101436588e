//! Typed boundary around the backend RPC surface.
//!
//! Backends answer reads with raw JSON payloads; the [`Gateway`] validates
//! every payload and maps it into the typed model. Malformed shapes become
//! [`BackendErrorKind::Malformed`] errors.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::model::{
    ColumnName, ConnectionParams, ForeignKeyDescriptor, ForeignKeyOption, Row, TableName,
    TableSchema, Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The backend refused the request (unknown table, constraint violation, bad input).
    Rejected,
    /// No usable connection to the data source.
    Disconnected,
    /// The response did not have the expected shape.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Rejected,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Disconnected,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Malformed,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.kind == BackendErrorKind::Disconnected
    }
}

/// The fixed RPC surface of a data source.
///
/// Read operations return the backend's raw payload. Expected shapes:
///
/// * `list_tables`: `["customers", "orders"]`
/// * `table_schema`: `{"columns": [..], "foreignKeys": {"col": {descriptor}}}`
/// * `table_content`: `[{"id": 1, "name": "Ada", "region_id__regions": "North"}]`
/// * `foreign_key_options`: `[{"id": 1, "display": "North"}]`
/// * `count_records`: `42`
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<(), BackendError>;
    async fn disconnect(&self) -> Result<(), BackendError>;
    async fn list_tables(&self) -> Result<JsonValue, BackendError>;
    async fn table_schema(&self, table: &str) -> Result<JsonValue, BackendError>;
    async fn table_content(&self, table: &str) -> Result<JsonValue, BackendError>;
    async fn foreign_key_options(
        &self,
        descriptor: &ForeignKeyDescriptor,
    ) -> Result<JsonValue, BackendError>;
    async fn insert_record(&self, table: &str, row: &Row) -> Result<(), BackendError>;
    async fn update_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
        row: &Row,
    ) -> Result<(), BackendError>;
    async fn delete_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
    ) -> Result<(), BackendError>;
    async fn count_records(&self, table: &str) -> Result<JsonValue, BackendError>;
}

#[derive(Debug)]
pub struct Gateway<B: Backend> {
    backend: B,
}

impl<B: Backend> Gateway<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn connect(&self, params: &ConnectionParams) -> Result<(), BackendError> {
        self.backend.connect(params).await
    }

    pub async fn disconnect(&self) -> Result<(), BackendError> {
        self.backend.disconnect().await
    }

    pub async fn list_tables(&self) -> Result<Vec<TableName>, BackendError> {
        parse_table_list(self.backend.list_tables().await?)
    }

    pub async fn table_schema(&self, table: &str) -> Result<TableSchema, BackendError> {
        parse_table_schema(table, self.backend.table_schema(table).await?)
    }

    pub async fn table_content(&self, table: &str) -> Result<Vec<Row>, BackendError> {
        parse_rows(table, self.backend.table_content(table).await?)
    }

    pub async fn foreign_key_options(
        &self,
        descriptor: &ForeignKeyDescriptor,
    ) -> Result<Vec<ForeignKeyOption>, BackendError> {
        parse_options(descriptor, self.backend.foreign_key_options(descriptor).await?)
    }

    pub async fn insert_record(&self, table: &str, row: &Row) -> Result<(), BackendError> {
        self.backend.insert_record(table, row).await
    }

    pub async fn update_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
        row: &Row,
    ) -> Result<(), BackendError> {
        self.backend
            .update_record(table, primary_key, primary_key_column, row)
            .await
    }

    pub async fn delete_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
    ) -> Result<(), BackendError> {
        self.backend
            .delete_record(table, primary_key, primary_key_column)
            .await
    }

    pub async fn count_records(&self, table: &str) -> Result<u64, BackendError> {
        let raw = self.backend.count_records(table).await?;
        raw.as_u64().ok_or_else(|| {
            BackendError::malformed(format!(
                "record count for `{table}` is not a non-negative integer: {raw}"
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSchema {
    columns: Vec<ColumnName>,
    #[serde(default)]
    foreign_keys: BTreeMap<ColumnName, WireForeignKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireForeignKey {
    #[serde(default)]
    column_name: Option<ColumnName>,
    referenced_table: TableName,
    referenced_column: ColumnName,
    descriptive_column: ColumnName,
    join_alias: ColumnName,
}

#[derive(Debug, Deserialize)]
struct WireOption {
    id: JsonValue,
    display: JsonValue,
}

fn parse_table_list(raw: JsonValue) -> Result<Vec<TableName>, BackendError> {
    let tables: Vec<TableName> = serde_json::from_value(raw)
        .map_err(|error| BackendError::malformed(format!("invalid table list: {error}")))?;

    let mut seen = BTreeSet::new();
    for table in &tables {
        if !seen.insert(table.as_str()) {
            return Err(BackendError::malformed(format!(
                "table `{table}` is listed more than once"
            )));
        }
    }
    Ok(tables)
}

fn parse_table_schema(table: &str, raw: JsonValue) -> Result<TableSchema, BackendError> {
    let wire: WireSchema = serde_json::from_value(raw).map_err(|error| {
        BackendError::malformed(format!("invalid schema for `{table}`: {error}"))
    })?;

    if wire.columns.is_empty() {
        return Err(BackendError::malformed(format!(
            "schema for `{table}` has no columns"
        )));
    }

    let mut physical = BTreeSet::new();
    for column in &wire.columns {
        if !physical.insert(column.as_str()) {
            return Err(BackendError::malformed(format!(
                "schema for `{table}` lists column `{column}` more than once"
            )));
        }
    }

    let mut aliases = BTreeSet::new();
    let mut foreign_keys = BTreeMap::new();
    for (column, foreign_key) in wire.foreign_keys {
        if !physical.contains(column.as_str()) {
            return Err(BackendError::malformed(format!(
                "foreign key `{column}` of `{table}` is not one of its columns"
            )));
        }
        if let Some(declared) = &foreign_key.column_name {
            if declared != &column {
                return Err(BackendError::malformed(format!(
                    "foreign key `{column}` of `{table}` declares column `{declared}`"
                )));
            }
        }
        if physical.contains(foreign_key.join_alias.as_str())
            || !aliases.insert(foreign_key.join_alias.clone())
        {
            return Err(BackendError::malformed(format!(
                "join alias `{}` of `{table}` is not unique",
                foreign_key.join_alias
            )));
        }

        foreign_keys.insert(
            column.clone(),
            ForeignKeyDescriptor {
                column_name: column,
                referenced_table: foreign_key.referenced_table,
                referenced_column: foreign_key.referenced_column,
                descriptive_column: foreign_key.descriptive_column,
                join_alias: foreign_key.join_alias,
            },
        );
    }

    Ok(TableSchema {
        table_name: table.to_string(),
        columns: wire.columns,
        foreign_keys,
    })
}

fn parse_rows(table: &str, raw: JsonValue) -> Result<Vec<Row>, BackendError> {
    let JsonValue::Array(items) = raw else {
        return Err(BackendError::malformed(format!(
            "content of `{table}` is not a list of rows"
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let JsonValue::Object(cells) = item else {
                return Err(BackendError::malformed(format!(
                    "row {index} of `{table}` is not an object"
                )));
            };
            cells
                .into_iter()
                .map(|(column, cell)| {
                    Value::from_json(&cell)
                        .map(|value| (column.clone(), value))
                        .ok_or_else(|| {
                            BackendError::malformed(format!(
                                "row {index} of `{table}` has a non-scalar value in `{column}`"
                            ))
                        })
                })
                .collect::<Result<Row, BackendError>>()
        })
        .collect()
}

fn parse_options(
    descriptor: &ForeignKeyDescriptor,
    raw: JsonValue,
) -> Result<Vec<ForeignKeyOption>, BackendError> {
    let column = &descriptor.column_name;
    let wire: Vec<WireOption> = serde_json::from_value(raw).map_err(|error| {
        BackendError::malformed(format!("invalid options for `{column}`: {error}"))
    })?;

    wire.into_iter()
        .map(|option| {
            let id = Value::from_json(&option.id);
            let display = Value::from_json(&option.display);
            match (id, display) {
                (Some(id), Some(display)) => Ok(ForeignKeyOption {
                    id,
                    display: display.to_string(),
                }),
                _ => Err(BackendError::malformed(format!(
                    "option for `{column}` has a non-scalar id or label"
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_options, parse_rows, parse_table_list, parse_table_schema, BackendErrorKind};
    use crate::model::{ForeignKeyDescriptor, Value};

    fn region_descriptor() -> ForeignKeyDescriptor {
        ForeignKeyDescriptor {
            column_name: "region_id".to_string(),
            referenced_table: "regions".to_string(),
            referenced_column: "id".to_string(),
            descriptive_column: "name".to_string(),
            join_alias: "region_id__regions".to_string(),
        }
    }

    #[test]
    fn table_list_rejects_duplicates_and_non_strings() {
        let tables = parse_table_list(json!(["customers", "orders"])).expect("valid list");
        assert_eq!(tables, vec!["customers".to_string(), "orders".to_string()]);

        let err = parse_table_list(json!(["a", "a"])).expect_err("duplicate table");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);

        let err = parse_table_list(json!({"tables": []})).expect_err("wrong shape");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn schema_maps_foreign_keys_and_fills_column_name() {
        let schema = parse_table_schema(
            "customers",
            json!({
                "columns": ["id", "name", "region_id"],
                "foreignKeys": {
                    "region_id": {
                        "referencedTable": "regions",
                        "referencedColumn": "id",
                        "descriptiveColumn": "name",
                        "joinAlias": "region_id__regions"
                    }
                }
            }),
        )
        .expect("valid schema");

        assert_eq!(schema.table_name, "customers");
        assert_eq!(schema.primary_key(), Some("id"));
        assert_eq!(schema.foreign_key("region_id"), Some(&region_descriptor()));
    }

    #[test]
    fn schema_without_foreign_keys_field_is_accepted() {
        let schema = parse_table_schema("regions", json!({"columns": ["id", "name"]}))
            .expect("foreign keys are optional");
        assert!(schema.foreign_keys.is_empty());
    }

    #[test]
    fn schema_rejects_foreign_key_outside_columns() {
        let err = parse_table_schema(
            "customers",
            json!({
                "columns": ["id", "name"],
                "foreignKeys": {
                    "region_id": {
                        "referencedTable": "regions",
                        "referencedColumn": "id",
                        "descriptiveColumn": "name",
                        "joinAlias": "region_id__regions"
                    }
                }
            }),
        )
        .expect_err("foreign key must name a physical column");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn schema_rejects_alias_colliding_with_column() {
        let err = parse_table_schema(
            "customers",
            json!({
                "columns": ["id", "region_id", "label"],
                "foreignKeys": {
                    "region_id": {
                        "referencedTable": "regions",
                        "referencedColumn": "id",
                        "descriptiveColumn": "name",
                        "joinAlias": "label"
                    }
                }
            }),
        )
        .expect_err("alias collides with a physical column");
        assert!(err.message().contains("label"));
    }

    #[test]
    fn schema_rejects_missing_columns() {
        let err = parse_table_schema("customers", json!({"foreignKeys": {}}))
            .expect_err("columns are required");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);

        let err = parse_table_schema("customers", json!({"columns": []}))
            .expect_err("a primary key column is required");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn rows_keep_null_distinct_from_empty_string() {
        let rows = parse_rows(
            "customers",
            json!([{"id": 1, "name": "", "note": null}]),
        )
        .expect("valid rows");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::text("")));
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
    }

    #[test]
    fn rows_reject_nested_values() {
        let err = parse_rows("customers", json!([{"id": 1, "tags": ["a"]}]))
            .expect_err("nested values are malformed");
        assert!(err.message().contains("tags"));

        let err = parse_rows("customers", json!([1, 2])).expect_err("rows must be objects");
        assert_eq!(err.kind(), BackendErrorKind::Malformed);
    }

    #[test]
    fn options_render_labels_as_text() {
        let options = parse_options(
            &region_descriptor(),
            json!([{"id": 1, "display": "North"}, {"id": 2, "display": null}]),
        )
        .expect("valid options");

        assert_eq!(options[0].id, Value::int(1));
        assert_eq!(options[0].display, "North");
        assert_eq!(options[1].display, "NULL");
    }
}
