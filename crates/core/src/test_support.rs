use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{json, Map, Value as JsonValue};

use crate::gateway::{Backend, BackendError};
use crate::model::{ConnectionParams, ForeignKeyDescriptor, Row, Value};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub tables: Vec<String>,
    pub schemas: BTreeMap<String, JsonValue>,
    pub rows: BTreeMap<String, Vec<Map<String, JsonValue>>>,
    pub options: BTreeMap<String, Result<JsonValue, String>>,
    pub reachable: bool,
    pub connect_error: Option<String>,
    pub hang_connect: bool,
    pub hang_tables: bool,
    pub fail_next_write: Option<BackendError>,
    pub fail_content: Option<BackendError>,
    pub next_id: i64,
    pub calls: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    /// `customers` references `regions`; `orders` has no foreign keys.
    pub fn warehouse() -> Self {
        let mut state = FakeState {
            tables: vec![
                "customers".to_string(),
                "orders".to_string(),
                "regions".to_string(),
            ],
            reachable: true,
            next_id: 100,
            ..FakeState::default()
        };
        state.schemas.insert(
            "customers".to_string(),
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
        );
        state.schemas.insert(
            "orders".to_string(),
            json!({"columns": ["order_no", "total", "note"]}),
        );
        state.schemas.insert(
            "regions".to_string(),
            json!({"columns": ["id", "name"]}),
        );
        state.rows.insert(
            "customers".to_string(),
            vec![
                object(json!({
                    "id": 1, "name": "Ada", "region_id": 1, "region_id__regions": "North"
                })),
                object(json!({
                    "id": 2, "name": "Linus", "region_id": null, "region_id__regions": null
                })),
            ],
        );
        state.rows.insert(
            "orders".to_string(),
            vec![object(json!({"order_no": 7, "total": 19.5, "note": ""}))],
        );
        state.rows.insert(
            "regions".to_string(),
            vec![
                object(json!({"id": 1, "name": "North"})),
                object(json!({"id": 2, "name": "South"})),
            ],
        );
        state.options.insert(
            "region_id".to_string(),
            Ok(json!([{"id": 1, "display": "North"}, {"id": 2, "display": "South"}])),
        );
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake backend state poisoned");
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.with_state(|state| state.rows.get(table).map_or(0, Vec::len))
    }
}

fn object(raw: JsonValue) -> Map<String, JsonValue> {
    match raw {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

fn primary_key_column(state: &FakeState, table: &str) -> Option<String> {
    state
        .schemas
        .get(table)
        .and_then(|schema| schema["columns"][0].as_str())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl Backend for FakeBackend {
    async fn connect(&self, _params: &ConnectionParams) -> Result<(), BackendError> {
        let hang = self.with_state(|state| {
            state.calls.push("connect".to_string());
            state.hang_connect
        });
        if hang {
            return std::future::pending().await;
        }
        self.with_state(|state| match &state.connect_error {
            Some(message) => Err(BackendError::disconnected(message.clone())),
            None => Ok(()),
        })
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.with_state(|state| state.calls.push("disconnect".to_string()));
        Ok(())
    }

    async fn list_tables(&self) -> Result<JsonValue, BackendError> {
        let hang = self.with_state(|state| {
            state.calls.push("tables".to_string());
            state.hang_tables
        });
        if hang {
            return std::future::pending().await;
        }
        self.with_state(|state| {
            if state.reachable {
                Ok(json!(state.tables))
            } else {
                Err(BackendError::disconnected("connection refused"))
            }
        })
    }

    async fn table_schema(&self, table: &str) -> Result<JsonValue, BackendError> {
        self.with_state(|state| {
            state.calls.push(format!("schema:{table}"));
            state
                .schemas
                .get(table)
                .cloned()
                .ok_or_else(|| BackendError::new(format!("Table '{table}' doesn't exist")))
        })
    }

    async fn table_content(&self, table: &str) -> Result<JsonValue, BackendError> {
        self.with_state(|state| {
            state.calls.push(format!("content:{table}"));
            if let Some(error) = state.fail_content.take() {
                return Err(error);
            }
            let rows = state.rows.get(table).cloned().unwrap_or_default();
            Ok(JsonValue::Array(
                rows.into_iter().map(JsonValue::Object).collect(),
            ))
        })
    }

    async fn foreign_key_options(
        &self,
        descriptor: &ForeignKeyDescriptor,
    ) -> Result<JsonValue, BackendError> {
        self.with_state(|state| {
            state
                .calls
                .push(format!("options:{}", descriptor.column_name));
            match state.options.get(&descriptor.column_name) {
                Some(Ok(options)) => Ok(options.clone()),
                Some(Err(message)) => Err(BackendError::new(message.clone())),
                None => Ok(json!([])),
            }
        })
    }

    async fn insert_record(&self, table: &str, row: &Row) -> Result<(), BackendError> {
        self.with_state(|state| {
            state.calls.push(format!("insert:{table}"));
            if let Some(error) = state.fail_next_write.take() {
                return Err(error);
            }
            let key = primary_key_column(state, table)
                .ok_or_else(|| BackendError::new(format!("Table '{table}' doesn't exist")))?;
            let mut record = Map::new();
            record.insert(key, json!(state.next_id));
            state.next_id += 1;
            for (column, value) in row.iter() {
                record.insert(column.clone(), value.to_json());
            }
            state.rows.entry(table.to_string()).or_default().push(record);
            Ok(())
        })
    }

    async fn update_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
        row: &Row,
    ) -> Result<(), BackendError> {
        self.with_state(|state| {
            state.calls.push(format!("update:{table}:{primary_key}"));
            if let Some(error) = state.fail_next_write.take() {
                return Err(error);
            }
            let key = primary_key.to_json();
            let target = state
                .rows
                .get_mut(table)
                .and_then(|rows| {
                    rows.iter_mut()
                        .find(|record| record.get(primary_key_column) == Some(&key))
                })
                .ok_or_else(|| BackendError::new("no record matched the primary key"))?;
            for (column, value) in row.iter() {
                target.insert(column.clone(), value.to_json());
            }
            Ok(())
        })
    }

    async fn delete_record(
        &self,
        table: &str,
        primary_key: &Value,
        primary_key_column: &str,
    ) -> Result<(), BackendError> {
        self.with_state(|state| {
            state.calls.push(format!("delete:{table}:{primary_key}"));
            if let Some(error) = state.fail_next_write.take() {
                return Err(error);
            }
            let rows = state.rows.entry(table.to_string()).or_default();
            let before = rows.len();
            rows.retain(|record| record.get(primary_key_column) != Some(&primary_key.to_json()));
            if rows.len() == before {
                return Err(BackendError::new("no record matched the primary key"));
            }
            Ok(())
        })
    }

    async fn count_records(&self, table: &str) -> Result<JsonValue, BackendError> {
        self.with_state(|state| Ok(json!(state.rows.get(table).map_or(0, Vec::len))))
    }
}
