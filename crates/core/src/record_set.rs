//! Active table content, the current selection, and record mutations.
//!
//! Content is only ever replaced wholesale. Each load carries a
//! [`LoadTicket`]; responses for a table that is no longer active, or older
//! than one already applied, are dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::gateway::{Backend, BackendError, Gateway};
use crate::model::{LoadTicket, Row, TableName, TableSchema, Value};
use crate::notifications::NotificationQueue;
use crate::scheduler::Clock;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    table: Option<TableName>,
    rows: Vec<Row>,
}

impl RecordSet {
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds the write payload: every column but the primary key, with blank
/// input sent as `NULL`.
#[must_use]
pub fn editable_payload(schema: &TableSchema, values: &Row) -> Row {
    schema
        .editable_columns()
        .iter()
        .map(|column| {
            let value = match values.get(column) {
                Some(value) if !value.is_blank() => value.clone(),
                _ => Value::Null,
            };
            (column.clone(), value)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct RecordSetController {
    active: Option<TableName>,
    schema: Option<Arc<TableSchema>>,
    records: RecordSet,
    selection: Option<Value>,
    issued: u64,
    applied: u64,
}

impl RecordSetController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active_table(&self) -> Option<&str> {
        self.active.as_deref()
    }

    #[must_use]
    pub fn schema(&self) -> Option<&Arc<TableSchema>> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn record_set(&self) -> &RecordSet {
        &self.records
    }

    #[must_use]
    pub fn selected_key(&self) -> Option<&Value> {
        self.selection.as_ref()
    }

    /// The selected row as it exists in the current record set.
    #[must_use]
    pub fn selection(&self) -> Option<&Row> {
        let key = self.selection.as_ref()?;
        self.find_by_key(key)
    }

    /// Points the controller at `schema`'s table. Switching tables drops the
    /// old rows and the selection.
    pub fn bind_schema(&mut self, schema: Arc<TableSchema>) {
        if self.active.as_deref() != Some(schema.table_name.as_str()) {
            self.active = Some(schema.table_name.clone());
            self.records = RecordSet::default();
        }
        self.selection = None;
        self.schema = Some(schema);
    }

    /// Detaches from any table while a new one is being resolved.
    pub fn reset(&mut self) {
        self.active = None;
        self.schema = None;
        self.records = RecordSet::default();
        self.selection = None;
    }

    pub fn begin_load(&mut self, table: &str) -> LoadTicket {
        if self.active.as_deref() != Some(table) {
            self.active = Some(table.to_string());
            self.schema = None;
            self.records = RecordSet::default();
            self.selection = None;
        }
        self.issued += 1;
        LoadTicket {
            table: table.to_string(),
            sequence: self.issued,
        }
    }

    /// Replaces the record set with `rows` unless the ticket was superseded.
    /// Returns whether the rows were applied.
    pub fn finish_load(&mut self, ticket: &LoadTicket, rows: Vec<Row>) -> bool {
        if self.active.as_deref() != Some(ticket.table.as_str()) || ticket.sequence <= self.applied
        {
            debug!(table = %ticket.table, sequence = ticket.sequence, "discarding stale content");
            return false;
        }
        self.applied = ticket.sequence;
        self.records = RecordSet {
            table: Some(ticket.table.clone()),
            rows,
        };
        self.selection = None;
        true
    }

    pub async fn load_content<B: Backend>(
        &mut self,
        gateway: &Gateway<B>,
        table: &str,
    ) -> Result<(), BackendError> {
        let ticket = self.begin_load(table);
        let rows = gateway.table_content(table).await?;
        self.finish_load(&ticket, rows);
        Ok(())
    }

    /// Selects `row` if a row with the same primary-key value is in the
    /// current record set.
    pub fn select(&mut self, row: &Row) -> bool {
        let Some(key) = self.primary_key().and_then(|column| row.get(column)).cloned() else {
            return false;
        };
        self.select_key(&key)
    }

    pub fn select_key(&mut self, key: &Value) -> bool {
        if self.find_by_key(key).is_none() {
            return false;
        }
        self.selection = Some(key.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub async fn insert<B: Backend, C: Clock>(
        &mut self,
        gateway: &Gateway<B>,
        notices: &mut NotificationQueue,
        clock: &C,
        values: &Row,
    ) -> Result<(), SessionError> {
        let (table, schema) = self.target()?;
        let payload = editable_payload(&schema, values);

        if let Err(error) = gateway.insert_record(&table, &payload).await {
            warn!(table = %table, error = %error, "insert failed");
            notices.error_at(format!("Failed to add record: {error}"), clock.now());
            return Err(error.into());
        }

        notices.success_at(format!("Record added to {table}"), clock.now());
        self.reload(gateway, notices, clock, &table).await
    }

    /// `primary_key` is the value captured from the selection when the edit
    /// began; it addresses the record even if the edit changes other columns.
    pub async fn update<B: Backend, C: Clock>(
        &mut self,
        gateway: &Gateway<B>,
        notices: &mut NotificationQueue,
        clock: &C,
        primary_key: &Value,
        values: &Row,
    ) -> Result<(), SessionError> {
        let (table, schema) = self.target()?;
        let key_column = schema.primary_key().ok_or(SessionError::NoActiveTable)?;
        let payload = editable_payload(&schema, values);

        if let Err(error) = gateway
            .update_record(&table, primary_key, key_column, &payload)
            .await
        {
            warn!(table = %table, key = %primary_key, error = %error, "update failed");
            notices.error_at(format!("Failed to update record: {error}"), clock.now());
            return Err(error.into());
        }

        notices.success_at(format!("Record in {table} updated"), clock.now());
        self.reload(gateway, notices, clock, &table).await?;
        self.select_key(primary_key);
        Ok(())
    }

    /// Deletes the selected record. On failure the selection is kept so the
    /// deletion can be retried.
    pub async fn delete<B: Backend, C: Clock>(
        &mut self,
        gateway: &Gateway<B>,
        notices: &mut NotificationQueue,
        clock: &C,
    ) -> Result<(), SessionError> {
        let (table, schema) = self.target()?;
        let key_column = schema.primary_key().ok_or(SessionError::NoActiveTable)?;
        let primary_key = self.selection.clone().ok_or(SessionError::NoSelection)?;

        if let Err(error) = gateway
            .delete_record(&table, &primary_key, key_column)
            .await
        {
            warn!(table = %table, key = %primary_key, error = %error, "delete failed");
            notices.error_at(format!("Failed to delete record: {error}"), clock.now());
            return Err(error.into());
        }

        self.selection = None;
        notices.success_at(format!("Record deleted from {table}"), clock.now());
        self.reload(gateway, notices, clock, &table).await
    }

    async fn reload<B: Backend, C: Clock>(
        &mut self,
        gateway: &Gateway<B>,
        notices: &mut NotificationQueue,
        clock: &C,
        table: &str,
    ) -> Result<(), SessionError> {
        if let Err(error) = self.load_content(gateway, table).await {
            warn!(table = %table, error = %error, "reload after write failed");
            notices.error_at(format!("Failed to reload {table}: {error}"), clock.now());
            return Err(error.into());
        }
        Ok(())
    }

    fn target(&self) -> Result<(TableName, Arc<TableSchema>), SessionError> {
        match (&self.active, &self.schema) {
            (Some(table), Some(schema)) => Ok((table.clone(), Arc::clone(schema))),
            _ => Err(SessionError::NoActiveTable),
        }
    }

    fn primary_key(&self) -> Option<&str> {
        self.schema.as_ref().and_then(|schema| schema.primary_key())
    }

    fn find_by_key(&self, key: &Value) -> Option<&Row> {
        let column = self.primary_key()?;
        self.records
            .rows
            .iter()
            .find(|row| row.get(column) == Some(key))
    }
}
