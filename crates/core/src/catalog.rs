use std::sync::Arc;

use tracing::debug;

use crate::gateway::{Backend, BackendError, Gateway};
use crate::model::{ColumnName, LoadTicket, TableName, TableSchema};

/// Non-foreign-key columns in schema order, then one join alias per foreign
/// key in map order.
#[must_use]
pub fn derive_display_columns(schema: &TableSchema) -> Vec<ColumnName> {
    schema
        .columns
        .iter()
        .filter(|column| !schema.foreign_keys.contains_key(column.as_str()))
        .cloned()
        .chain(
            schema
                .foreign_keys
                .values()
                .map(|foreign_key| foreign_key.join_alias.clone()),
        )
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableListing {
    pub tables: Vec<TableName>,
    /// Set only when the listing made the implicit first-table selection.
    pub auto_selected: Option<TableName>,
}

#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: Vec<TableName>,
    active: Option<TableName>,
    schema: Option<Arc<TableSchema>>,
    display_columns: Vec<ColumnName>,
    issued: u64,
    applied: u64,
}

impl SchemaCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tables(&self) -> &[TableName] {
        &self.tables
    }

    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|candidate| candidate == table)
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
    pub fn display_columns(&self) -> &[ColumnName] {
        &self.display_columns
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.schema.as_ref().and_then(|schema| schema.primary_key())
    }

    pub async fn load_tables<B: Backend>(
        &mut self,
        gateway: &Gateway<B>,
    ) -> Result<TableListing, BackendError> {
        let tables = gateway.list_tables().await?;
        Ok(self.apply_tables(tables))
    }

    /// Replaces the table list. Selects the first table only if nothing is
    /// active yet.
    pub fn apply_tables(&mut self, tables: Vec<TableName>) -> TableListing {
        self.tables = tables;
        let auto_selected = if self.active.is_none() {
            self.tables.first().cloned()
        } else {
            None
        };
        if let Some(first) = &auto_selected {
            debug!(table = %first, "selecting first table");
            self.active = Some(first.clone());
        }
        TableListing {
            tables: self.tables.clone(),
            auto_selected,
        }
    }

    /// Makes `table` active and drops the previous schema so nothing derived
    /// from it outlives the switch.
    pub fn begin_schema(&mut self, table: &str) -> LoadTicket {
        if self.active.as_deref() != Some(table) {
            self.active = Some(table.to_string());
        }
        self.schema = None;
        self.display_columns.clear();
        self.issued += 1;
        LoadTicket {
            table: table.to_string(),
            sequence: self.issued,
        }
    }

    /// Applies a schema response unless it was superseded. Returns whether it
    /// was applied.
    pub fn finish_schema(&mut self, ticket: &LoadTicket, schema: Arc<TableSchema>) -> bool {
        if self.active.as_deref() != Some(ticket.table.as_str()) || ticket.sequence <= self.applied
        {
            debug!(table = %ticket.table, sequence = ticket.sequence, "discarding stale schema");
            return false;
        }
        self.applied = ticket.sequence;
        self.display_columns = derive_display_columns(&schema);
        self.schema = Some(schema);
        true
    }

    pub async fn load_schema<B: Backend>(
        &mut self,
        gateway: &Gateway<B>,
        table: &str,
    ) -> Result<Arc<TableSchema>, BackendError> {
        let ticket = self.begin_schema(table);
        let schema = Arc::new(gateway.table_schema(table).await?);
        self.finish_schema(&ticket, Arc::clone(&schema));
        Ok(schema)
    }

    pub fn reset(&mut self) {
        self.tables.clear();
        self.active = None;
        self.schema = None;
        self.display_columns.clear();
    }
}
