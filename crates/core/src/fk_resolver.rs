//! Foreign-key option lookup and the edit forms that consume it.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::PartialResolutionError;
use crate::gateway::{Backend, Gateway};
use crate::model::{ColumnName, ForeignKeyDescriptor, ForeignKeyOption, Row, TableName, Value};
use crate::notifications::NotificationQueue;
use crate::scheduler::Clock;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedOptions {
    pub options: BTreeMap<ColumnName, Vec<ForeignKeyOption>>,
    /// Columns whose fetch failed; each has an empty option list.
    pub failed: Vec<ColumnName>,
}

impl ResolvedOptions {
    #[must_use]
    pub fn options_for(&self, column: &str) -> &[ForeignKeyOption] {
        self.options.get(column).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn partial_error(&self) -> Option<PartialResolutionError> {
        if self.failed.is_empty() {
            None
        } else {
            Some(PartialResolutionError {
                columns: self.failed.clone(),
            })
        }
    }
}

/// Fetches the option list of every foreign key, one request per column.
///
/// A failing column gets an error notification and an empty list; the
/// remaining columns are still resolved.
pub async fn resolve_options<B: Backend, C: Clock>(
    gateway: &Gateway<B>,
    notices: &mut NotificationQueue,
    clock: &C,
    foreign_keys: &BTreeMap<ColumnName, ForeignKeyDescriptor>,
) -> ResolvedOptions {
    let mut resolved = ResolvedOptions::default();
    for (column, descriptor) in foreign_keys {
        match gateway.foreign_key_options(descriptor).await {
            Ok(options) => {
                resolved.options.insert(column.clone(), options);
            }
            Err(error) => {
                warn!(
                    column = %column,
                    table = %descriptor.referenced_table,
                    error = %error,
                    "option fetch failed"
                );
                notices.error_at(
                    format!("Failed to load options for {column}: {error}"),
                    clock.now(),
                );
                resolved.options.insert(column.clone(), Vec::new());
                resolved.failed.push(column.clone());
            }
        }
    }
    resolved
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormMode {
    Insert,
    /// Carries the key of the row being edited, captured when the form opened.
    Update { primary_key: Value },
}

/// An open add/edit form. Option lists live only as long as the form.
#[derive(Debug, Clone, PartialEq)]
pub struct EditForm {
    pub mode: FormMode,
    pub table: TableName,
    pub values: Row,
    pub options: ResolvedOptions,
}

impl EditForm {
    #[must_use]
    pub fn insert(table: impl Into<TableName>, options: ResolvedOptions) -> Self {
        Self {
            mode: FormMode::Insert,
            table: table.into(),
            values: Row::new(),
            options,
        }
    }

    #[must_use]
    pub fn update(
        table: impl Into<TableName>,
        primary_key: Value,
        values: Row,
        options: ResolvedOptions,
    ) -> Self {
        Self {
            mode: FormMode::Update { primary_key },
            table: table.into(),
            values,
            options,
        }
    }

    /// Stores raw text input; an empty string becomes `NULL`.
    pub fn set_input(&mut self, column: impl Into<ColumnName>, raw: &str) {
        self.values.set(column, Value::from_input(raw));
    }

    pub fn set_value(&mut self, column: impl Into<ColumnName>, value: Value) {
        self.values.set(column, value);
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&Value> {
        match &self.mode {
            FormMode::Insert => None,
            FormMode::Update { primary_key } => Some(primary_key),
        }
    }
}
