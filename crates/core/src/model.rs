use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

pub type TableName = String;
pub type ColumnName = String;

/// A single cell value. `Null` and an empty `Text` are distinct values.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(Number),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::Number(Number::from(value))
    }

    /// Converts raw form input; an empty string is sent as `NULL`.
    #[must_use]
    pub fn from_input(raw: &str) -> Self {
        if raw.is_empty() {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    /// Returns `None` for booleans, arrays and objects.
    #[must_use]
    pub fn from_json(raw: &JsonValue) -> Option<Self> {
        match raw {
            JsonValue::Null => Some(Self::Null),
            JsonValue::Number(number) => Some(Self::Number(number.clone())),
            JsonValue::String(text) => Some(Self::Text(text.clone())),
            JsonValue::Bool(_) | JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Number(number) => JsonValue::Number(number.clone()),
            Self::Text(text) => JsonValue::String(text.clone()),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Form-level emptiness: `NULL` or an empty string.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            Self::Number(_) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

/// Column (or join alias) to value mapping for one record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: BTreeMap<ColumnName, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<ColumnName>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<ColumnName>, value: Value) -> Option<Value> {
        self.values.insert(column.into(), value)
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnName, &Value)> {
        self.values.iter()
    }

    /// Renders a cell for display; absent cells render as an empty string.
    #[must_use]
    pub fn render(&self, column: &str) -> String {
        self.values
            .get(column)
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

impl FromIterator<(ColumnName, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (ColumnName, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDescriptor {
    pub column_name: ColumnName,
    pub referenced_table: TableName,
    pub referenced_column: ColumnName,
    pub descriptive_column: ColumnName,
    pub join_alias: ColumnName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: TableName,
    pub columns: Vec<ColumnName>,
    pub foreign_keys: BTreeMap<ColumnName, ForeignKeyDescriptor>,
}

impl TableSchema {
    /// First column by backend ordering contract.
    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    /// Every physical column except the primary key.
    #[must_use]
    pub fn editable_columns(&self) -> &[ColumnName] {
        self.columns.get(1..).unwrap_or_default()
    }

    #[must_use]
    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.get(column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyOption {
    pub id: Value,
    pub display: String,
}

/// Tags an in-flight load with the table it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub table: TableName,
    pub sequence: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionParams {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}
