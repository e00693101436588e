use std::collections::BTreeMap;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, DriverError, OptsBuilder, Params, Pool, Row, Value};
use rowdeck_core::gateway::{Backend, BackendError};
use rowdeck_core::model::{
    ColumnName, ConnectionParams, ForeignKeyDescriptor, Row as RecordRow, Value as CellValue,
};
use serde_json::{json, Map, Number, Value as JsonValue};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::sql_generator::{
    content_select_sql, count_sql, delete_sql, foreign_key_options_sql, insert_sql, join_alias,
    update_sql, SqlGenerationError, DESCRIPTIVE_COLUMN_SQL, TABLE_COLUMNS_SQL,
    TABLE_FOREIGN_KEYS_SQL,
};

/// MySQL implementation of the browser's RPC surface.
///
/// The pool is created by `connect` and kept even if the first ping fails, so
/// later table-list probes can succeed once the server comes up.
#[derive(Debug)]
pub struct MysqlBackend {
    pool: Mutex<Option<Pool>>,
    ready: watch::Sender<bool>,
}

impl Default for MysqlBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MysqlBackend {
    #[must_use]
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            pool: Mutex::new(None),
            ready,
        }
    }

    /// Flips to `true` once a connect attempt has reached the server.
    #[must_use]
    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    async fn conn(&self) -> Result<Conn, BackendError> {
        let pool = self
            .pool
            .lock()
            .await
            .clone()
            .ok_or_else(|| BackendError::disconnected("not connected"))?;
        pool.get_conn().await.map_err(to_backend_error)
    }

    async fn describe(
        conn: &mut Conn,
        table: &str,
    ) -> Result<(Vec<ColumnName>, BTreeMap<ColumnName, ForeignKeyDescriptor>), BackendError> {
        let columns = conn
            .exec_map(TABLE_COLUMNS_SQL, (table.to_string(),), |column: String| column)
            .await
            .map_err(to_backend_error)?;
        if columns.is_empty() {
            return Err(BackendError::new(format!("Table '{table}' doesn't exist")));
        }

        let references = conn
            .exec_map(
                TABLE_FOREIGN_KEYS_SQL,
                (table.to_string(),),
                |(column, referenced_table, referenced_column): (String, String, String)| {
                    (column, referenced_table, referenced_column)
                },
            )
            .await
            .map_err(to_backend_error)?;

        let mut foreign_keys = BTreeMap::new();
        for (column, referenced_table, referenced_column) in references {
            if foreign_keys.contains_key(&column) {
                continue;
            }
            let descriptive_column = conn
                .exec_first::<String, _, _>(
                    DESCRIPTIVE_COLUMN_SQL,
                    (referenced_table.clone(), referenced_column.clone()),
                )
                .await
                .map_err(to_backend_error)?
                .unwrap_or_else(|| referenced_column.clone());
            foreign_keys.insert(
                column.clone(),
                ForeignKeyDescriptor {
                    join_alias: join_alias(&column, &referenced_table),
                    column_name: column,
                    referenced_table,
                    referenced_column,
                    descriptive_column,
                },
            );
        }

        Ok((columns, foreign_keys))
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    async fn connect(&self, params: &ConnectionParams) -> Result<(), BackendError> {
        let pool = Pool::new(opts_from_params(params));
        let previous = self.pool.lock().await.replace(pool.clone());
        self.ready.send_replace(false);
        if let Some(previous) = previous {
            if let Err(error) = previous.disconnect().await {
                debug!(error = %error, "closing previous pool failed");
            }
        }

        let mut conn = pool.get_conn().await.map_err(to_backend_error)?;
        conn.ping().await.map_err(to_backend_error)?;
        info!(host = %params.host, port = params.port, "mysql connection established");
        self.ready.send_replace(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let pool = self.pool.lock().await.take();
        self.ready.send_replace(false);
        match pool {
            Some(pool) => pool.disconnect().await.map_err(to_backend_error),
            None => Ok(()),
        }
    }

    async fn list_tables(&self) -> Result<JsonValue, BackendError> {
        let mut conn = self.conn().await?;
        let tables = conn
            .query_map("SHOW TABLES", |table: String| table)
            .await
            .map_err(to_backend_error)?;
        Ok(json!(tables))
    }

    async fn table_schema(&self, table: &str) -> Result<JsonValue, BackendError> {
        let mut conn = self.conn().await?;
        let (columns, foreign_keys) = Self::describe(&mut conn, table).await?;
        let foreign_keys = serde_json::to_value(&foreign_keys)
            .map_err(|error| BackendError::malformed(error.to_string()))?;
        Ok(json!({ "columns": columns, "foreignKeys": foreign_keys }))
    }

    async fn table_content(&self, table: &str) -> Result<JsonValue, BackendError> {
        let mut conn = self.conn().await?;
        let (columns, foreign_keys) = Self::describe(&mut conn, table).await?;
        let sql = content_select_sql(table, &columns, &foreign_keys).map_err(to_sql_error)?;
        let rows: Vec<Row> = conn.exec(sql, ()).await.map_err(to_backend_error)?;
        Ok(JsonValue::Array(rows.into_iter().map(row_to_json).collect()))
    }

    async fn foreign_key_options(
        &self,
        descriptor: &ForeignKeyDescriptor,
    ) -> Result<JsonValue, BackendError> {
        let sql = foreign_key_options_sql(descriptor).map_err(to_sql_error)?;
        let mut conn = self.conn().await?;
        let rows: Vec<Row> = conn.exec(sql, ()).await.map_err(to_backend_error)?;
        Ok(JsonValue::Array(rows.into_iter().map(row_to_json).collect()))
    }

    async fn insert_record(&self, table: &str, row: &RecordRow) -> Result<(), BackendError> {
        let (columns, values) = split_row(row);
        let sql = insert_sql(table, &columns).map_err(to_sql_error)?;
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, Params::Positional(values))
            .await
            .map_err(to_backend_error)
    }

    async fn update_record(
        &self,
        table: &str,
        primary_key: &CellValue,
        primary_key_column: &str,
        row: &RecordRow,
    ) -> Result<(), BackendError> {
        let (columns, mut values) = split_row(row);
        let sql = update_sql(table, &columns, primary_key_column).map_err(to_sql_error)?;
        values.push(cell_to_mysql(primary_key));
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, Params::Positional(values))
            .await
            .map_err(to_backend_error)
    }

    async fn delete_record(
        &self,
        table: &str,
        primary_key: &CellValue,
        primary_key_column: &str,
    ) -> Result<(), BackendError> {
        let sql = delete_sql(table, primary_key_column).map_err(to_sql_error)?;
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, (cell_to_mysql(primary_key),))
            .await
            .map_err(to_backend_error)?;
        if conn.affected_rows() == 0 {
            return Err(BackendError::new(format!(
                "no record in `{table}` has {primary_key_column} = {primary_key}"
            )));
        }
        Ok(())
    }

    async fn count_records(&self, table: &str) -> Result<JsonValue, BackendError> {
        let sql = count_sql(table).map_err(to_sql_error)?;
        let mut conn = self.conn().await?;
        let count = conn
            .exec_first::<u64, _, _>(sql, ())
            .await
            .map_err(to_backend_error)?;
        Ok(json!(count.unwrap_or(0)))
    }
}

fn opts_from_params(params: &ConnectionParams) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(params.host.clone())
        .tcp_port(params.port)
        .user(Some(params.user.clone()))
        .prefer_socket(false);

    if !params.password.is_empty() {
        builder = builder.pass(Some(params.password.clone()));
    }

    if !params.database.is_empty() {
        builder = builder.db_name(Some(params.database.clone()));
    }

    builder
}

fn split_row(row: &RecordRow) -> (Vec<&str>, Vec<Value>) {
    row.iter()
        .map(|(column, value)| (column.as_str(), cell_to_mysql(value)))
        .unzip()
}

fn cell_to_mysql(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::NULL,
        CellValue::Text(text) => Value::Bytes(text.as_bytes().to_vec()),
        CellValue::Number(number) => {
            if let Some(int) = number.as_i64() {
                Value::Int(int)
            } else if let Some(uint) = number.as_u64() {
                Value::UInt(uint)
            } else {
                number.as_f64().map_or(Value::NULL, Value::Double)
            }
        }
    }
}

fn row_to_json(row: Row) -> JsonValue {
    let names = row
        .columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect::<Vec<_>>();
    let cells = names
        .into_iter()
        .zip(row.unwrap().into_iter().map(mysql_to_json))
        .collect::<Map<_, _>>();
    JsonValue::Object(cells)
}

fn mysql_to_json(value: Value) -> JsonValue {
    match value {
        Value::NULL => JsonValue::Null,
        Value::Bytes(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(value) => json!(value),
        Value::UInt(value) => json!(value),
        Value::Float(value) => float_to_json(f64::from(value)),
        Value::Double(value) => float_to_json(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = format!("{year:04}-{month:02}-{day:02}");
            let text = match (hour, minute, second, micros) {
                (0, 0, 0, 0) => date,
                (_, _, _, 0) => format!("{date} {hour:02}:{minute:02}:{second:02}"),
                _ => format!("{date} {hour:02}:{minute:02}:{second:02}.{micros:06}"),
            };
            JsonValue::String(text)
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            let text = if micros == 0 {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
            } else {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
            };
            JsonValue::String(text)
        }
    }
}

fn float_to_json(value: f64) -> JsonValue {
    Number::from_f64(value).map_or_else(|| JsonValue::String(value.to_string()), JsonValue::Number)
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    match &error {
        mysql_async::Error::Io(_)
        | mysql_async::Error::Driver(
            DriverError::PoolDisconnected | DriverError::ConnectionClosed,
        ) => BackendError::disconnected(error.to_string()),
        mysql_async::Error::Server(server) => BackendError::new(server.message.clone()),
        _ => BackendError::new(error.to_string()),
    }
}

fn to_sql_error(error: SqlGenerationError) -> BackendError {
    BackendError::new(error.to_string())
}
