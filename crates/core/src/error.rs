use thiserror::Error;

use crate::gateway::BackendError;
use crate::model::{ColumnName, TableName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection timeout")]
    Timeout { last_error: Option<String> },
    #[error("connection lost: {0}")]
    Lost(#[source] BackendError),
    #[error("not connected to a data source")]
    NotReady,
}

/// One or more foreign-key option lists could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load options for {}", columns.join(", "))]
pub struct PartialResolutionError {
    pub columns: Vec<ColumnName>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no table is active")]
    NoActiveTable,
    #[error("no record is selected")]
    NoSelection,
    #[error("table `{0}` is not in the catalog")]
    UnknownTable(TableName),
    #[error("form targets `{0}`, which is no longer the active table")]
    StaleForm(TableName),
}

#[cfg(test)]
mod tests {
    use super::{ConnectionError, PartialResolutionError, SessionError};
    use crate::gateway::BackendError;

    #[test]
    fn messages_carry_backend_detail() {
        let lost = ConnectionError::Lost(BackendError::disconnected("socket closed"));
        assert_eq!(lost.to_string(), "connection lost: socket closed");

        let session = SessionError::from(BackendError::new("duplicate key"));
        assert_eq!(session.to_string(), "backend request failed: duplicate key");
    }

    #[test]
    fn partial_resolution_lists_columns() {
        let err = PartialResolutionError {
            columns: vec!["region_id".to_string(), "owner_id".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "failed to load options for region_id, owner_id"
        );
    }
}
