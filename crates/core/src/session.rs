//! The browser session: one connection, one active table, one selection.
//!
//! `BrowserSession` owns every controller and drives the flow from handshake
//! to content. Hosts call [`BrowserSession::tick`] when
//! [`BrowserSession::next_wakeup`] passes and forward the backend's ready push
//! to [`BrowserSession::on_backend_ready`].
//!
//! Handshake requests are bounded by the handshake deadline. One still
//! pending when it passes is dropped and the handshake times out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::catalog::SchemaCatalog;
use crate::connection::{ConnectionController, ConnectionEvent, ConnectionState};
use crate::error::{ConnectionError, SessionError};
use crate::fk_resolver::{resolve_options, EditForm, FormMode};
use crate::gateway::{Backend, BackendError, Gateway};
use crate::model::{ColumnName, ConnectionParams, Row, TableName, TableSchema, Value};
use crate::notifications::{Notification, NotificationQueue};
use crate::record_set::{RecordSet, RecordSetController};
use crate::scheduler::{Clock, SystemClock};
use crate::settings::EngineSettings;

#[derive(Debug)]
pub struct BrowserSession<B: Backend, C: Clock = SystemClock> {
    gateway: Gateway<B>,
    clock: C,
    connection: ConnectionController,
    catalog: SchemaCatalog,
    records: RecordSetController,
    notices: NotificationQueue,
}

impl<B: Backend> BrowserSession<B> {
    #[must_use]
    pub fn new(backend: B, settings: &EngineSettings) -> Self {
        Self::with_clock(backend, settings, SystemClock)
    }
}

impl<B: Backend, C: Clock> BrowserSession<B, C> {
    #[must_use]
    pub fn with_clock(backend: B, settings: &EngineSettings, clock: C) -> Self {
        Self {
            gateway: Gateway::new(backend),
            clock,
            connection: ConnectionController::from_settings(settings),
            catalog: SchemaCatalog::new(),
            records: RecordSetController::new(),
            notices: NotificationQueue::from_settings(settings),
        }
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway<B> {
        &self.gateway
    }

    #[must_use]
    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionController {
        &self.connection
    }

    #[must_use]
    pub fn tables(&self) -> &[TableName] {
        self.catalog.tables()
    }

    #[must_use]
    pub fn active_table(&self) -> Option<&str> {
        self.records.active_table()
    }

    #[must_use]
    pub fn schema(&self) -> Option<&Arc<TableSchema>> {
        self.records.schema()
    }

    #[must_use]
    pub fn display_columns(&self) -> &[ColumnName] {
        self.catalog.display_columns()
    }

    #[must_use]
    pub fn record_set(&self) -> &RecordSet {
        self.records.record_set()
    }

    #[must_use]
    pub fn selection(&self) -> Option<&Row> {
        self.records.selection()
    }

    #[must_use]
    pub fn notification(&self) -> Option<&Notification> {
        self.notices.current()
    }

    /// Earliest instant at which [`Self::tick`] has work to do.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<Instant> {
        match (self.connection.next_deadline(), self.notices.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Opens the backend connection and starts the handshake. The first probe
    /// is issued immediately; failures before the first `Ready` are retried
    /// silently until the timeout.
    pub async fn connect(&mut self, params: &ConnectionParams) -> &ConnectionState {
        let now = self.clock.now();
        self.catalog.reset();
        self.records.reset();
        self.connection.start_at(now);
        info!(host = %params.host, port = params.port, database = %params.database, "connecting");

        let budget = self.handshake_budget();
        match tokio::time::timeout(budget, self.gateway.connect(params)).await {
            Ok(Ok(())) => self.probe().await,
            Ok(Err(error)) => {
                if let Some(reported) = self.connection.probe_failed_at(now, error) {
                    self.report(&reported);
                }
            }
            Err(_) => self.handshake_timed_out(),
        }
        self.connection.state()
    }

    /// The backend's push signal. Returns whether it completed the handshake;
    /// it is a no-op if a probe already did.
    pub async fn on_backend_ready(&mut self) -> bool {
        if !self.connection.is_connecting() {
            return false;
        }
        self.complete_handshake(None).await;
        self.connection.is_ready()
    }

    /// Fires every due timer: notification expiry, handshake polls, the
    /// handshake timeout.
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        self.notices.expire_at(now);
        for event in self.connection.fire_due(now) {
            match event {
                ConnectionEvent::Probe => self.probe().await,
                ConnectionEvent::TimedOut(error) => self.report(&error),
            }
        }
    }

    /// Explicit disconnect: cancels timers, forgets the catalog and content.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.connection.reset();
        self.catalog.reset();
        self.records.reset();
        self.notices.dismiss();
        self.gateway.disconnect().await?;
        info!("disconnected");
        Ok(())
    }

    /// Makes `table` active: clears the selection, loads the schema, then the
    /// content.
    pub async fn select_table(&mut self, table: &str) -> Result<(), SessionError> {
        self.require_ready()?;
        if !self.catalog.contains(table) {
            return Err(SessionError::UnknownTable(table.to_string()));
        }

        self.records.reset();
        let schema = match self.catalog.load_schema(&self.gateway, table).await {
            Ok(schema) => schema,
            Err(error) => {
                return Err(self.fail(format!("Failed to load schema of {table}"), error));
            }
        };
        self.records.bind_schema(schema);

        if let Err(error) = self.records.load_content(&self.gateway, table).await {
            return Err(self.fail(format!("Failed to load {table}"), error));
        }
        Ok(())
    }

    /// Reloads the active table's content.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        self.require_ready()?;
        let table = self.active_table_name()?;
        if let Err(error) = self.records.load_content(&self.gateway, &table).await {
            return Err(self.fail(format!("Failed to load {table}"), error));
        }
        Ok(())
    }

    pub fn select_row(&mut self, row: &Row) -> bool {
        self.records.select(row)
    }

    pub fn clear_selection(&mut self) {
        self.records.clear_selection();
    }

    pub fn dismiss_notification(&mut self) -> Option<Notification> {
        self.notices.dismiss()
    }

    pub async fn count_records(&mut self) -> Result<u64, SessionError> {
        self.require_ready()?;
        let table = self.active_table_name()?;
        match self.gateway.count_records(&table).await {
            Ok(count) => Ok(count),
            Err(error) => Err(self.fail(format!("Failed to count records of {table}"), error)),
        }
    }

    pub async fn open_insert_form(&mut self) -> Result<EditForm, SessionError> {
        self.require_ready()?;
        let schema = self.active_schema()?;
        let options = resolve_options(
            &self.gateway,
            &mut self.notices,
            &self.clock,
            &schema.foreign_keys,
        )
        .await;
        Ok(EditForm::insert(schema.table_name.clone(), options))
    }

    /// Opens an edit form for the selected row, pre-filled with its physical
    /// columns. The row's key is fixed now, not at submit time.
    pub async fn open_update_form(&mut self) -> Result<EditForm, SessionError> {
        self.require_ready()?;
        let schema = self.active_schema()?;
        let (primary_key, values) = {
            let row = self.records.selection().ok_or(SessionError::NoSelection)?;
            let primary_key = self
                .records
                .selected_key()
                .cloned()
                .ok_or(SessionError::NoSelection)?;
            let values: Row = schema
                .columns
                .iter()
                .filter_map(|column| row.get(column).map(|value| (column.clone(), value.clone())))
                .collect();
            (primary_key, values)
        };
        let options = resolve_options(
            &self.gateway,
            &mut self.notices,
            &self.clock,
            &schema.foreign_keys,
        )
        .await;
        Ok(EditForm::update(
            schema.table_name.clone(),
            primary_key,
            values,
            options,
        ))
    }

    /// Submits a form. On error the form is left as it was so the caller can
    /// keep it open.
    pub async fn submit_form(&mut self, form: &EditForm) -> Result<(), SessionError> {
        if self.records.active_table() != Some(form.table.as_str()) {
            return Err(SessionError::StaleForm(form.table.clone()));
        }
        match &form.mode {
            FormMode::Insert => self.insert(&form.values).await,
            FormMode::Update { primary_key } => self.update(primary_key, &form.values).await,
        }
    }

    pub async fn insert(&mut self, values: &Row) -> Result<(), SessionError> {
        self.require_ready()?;
        let result = self
            .records
            .insert(&self.gateway, &mut self.notices, &self.clock, values)
            .await;
        self.observe(result)
    }

    pub async fn update(&mut self, primary_key: &Value, values: &Row) -> Result<(), SessionError> {
        self.require_ready()?;
        let result = self
            .records
            .update(
                &self.gateway,
                &mut self.notices,
                &self.clock,
                primary_key,
                values,
            )
            .await;
        self.observe(result)
    }

    pub async fn delete_selected(&mut self) -> Result<(), SessionError> {
        self.require_ready()?;
        let result = self
            .records
            .delete(&self.gateway, &mut self.notices, &self.clock)
            .await;
        self.observe(result)
    }

    async fn probe(&mut self) {
        let budget = self.handshake_budget();
        match tokio::time::timeout(budget, self.gateway.list_tables()).await {
            Ok(Ok(tables)) => {
                if self.connection.is_connecting() {
                    self.complete_handshake(Some(tables)).await;
                }
            }
            Ok(Err(error)) => {
                let now = self.clock.now();
                if let Some(reported) = self.connection.probe_failed_at(now, error) {
                    self.report(&reported);
                }
            }
            Err(_) => self.handshake_timed_out(),
        }
    }

    /// Time left until the handshake deadline; zero when none is pending.
    fn handshake_budget(&self) -> Duration {
        self.connection
            .handshake_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
            .unwrap_or_default()
    }

    fn handshake_timed_out(&mut self) {
        debug!("handshake request still pending at the deadline");
        if let Some(error) = self.connection.time_out() {
            self.report(&error);
        }
    }

    /// Shared success path of a probe and the ready push. Whichever arrives
    /// second finds the controller already `Ready` and stops here.
    async fn complete_handshake(&mut self, tables: Option<Vec<TableName>>) {
        if !self.connection.mark_ready() {
            return;
        }

        let listing = match tables {
            Some(tables) => self.catalog.apply_tables(tables),
            None => match self.catalog.load_tables(&self.gateway).await {
                Ok(listing) => listing,
                Err(error) => {
                    self.fail("Failed to load tables".to_string(), error);
                    return;
                }
            },
        };

        if let Some(first) = listing.auto_selected {
            if let Err(error) = self.select_table(&first).await {
                debug!(table = %first, error = %error, "first table did not load");
            }
        }
    }

    fn require_ready(&self) -> Result<(), SessionError> {
        if self.connection.is_ready() {
            Ok(())
        } else {
            Err(ConnectionError::NotReady.into())
        }
    }

    fn active_table_name(&self) -> Result<TableName, SessionError> {
        self.records
            .active_table()
            .map(str::to_string)
            .ok_or(SessionError::NoActiveTable)
    }

    fn active_schema(&self) -> Result<Arc<TableSchema>, SessionError> {
        self.records
            .schema()
            .cloned()
            .ok_or(SessionError::NoActiveTable)
    }

    fn report(&mut self, error: &ConnectionError) {
        let message = match error {
            ConnectionError::Timeout {
                last_error: Some(last_error),
            } => format!("{error} ({last_error})"),
            _ => error.to_string(),
        };
        warn!(error = %message, "connection failed");
        self.notices.error_at(message, self.clock.now());
    }

    /// Surfaces a failed read, dropping the connection if the transport is
    /// gone.
    fn fail(&mut self, context: String, error: BackendError) -> SessionError {
        warn!(error = %error, "{context}");
        self.notices
            .error_at(format!("{context}: {error}"), self.clock.now());
        self.connection.connection_lost(&error);
        SessionError::Backend(error)
    }

    fn observe(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        if let Err(SessionError::Backend(error)) = &result {
            self.connection.connection_lost(error);
        }
        result
    }
}
