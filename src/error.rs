//! Error taxonomy for the offline sync subsystem.
//!
//! `StoreError` is the only error that crosses the persistence boundary;
//! `SyncError` covers everything that happens on the wire. Refresh and drain
//! code catch both at per-resource / per-entry granularity and log them.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Failure of the local durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table `{0}` does not exist")]
    TableMissing(String),
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("local storage quota exceeded")]
    QuotaExceeded,
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("storage engine unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors that make every further store call pointless for this context.
    pub fn is_catastrophic(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::TableMissing(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref inner, ref message) = err {
            match inner.code {
                ErrorCode::DiskFull => return StoreError::QuotaExceeded,
                ErrorCode::ConstraintViolation => {
                    return StoreError::Constraint(
                        message.clone().unwrap_or_else(|| err.to_string()),
                    )
                }
                _ => {}
            }
        }
        let text = err.to_string();
        if let Some(rest) = text.split("no such table: ").nth(1) {
            let table = rest.split_whitespace().next().unwrap_or(rest);
            return StoreError::TableMissing(table.to_string());
        }
        StoreError::Unavailable(text)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Unavailable(format!("store task aborted: {err}"))
    }
}

/// Failure talking to the remote REST API.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced an HTTP response. Always retryable.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-2xx status.
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
    #[error("device is offline")]
    Offline,
    #[error("no staff session")]
    NotSignedIn,
    #[error("order not accepted for queueing: {0}")]
    InvalidOrder(#[from] OrderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure inside the background cache worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("install failed fetching {url}: {reason}")]
    Install { url: String, reason: String },
    #[error("worker is {0}, expected {1}")]
    InvalidState(&'static str, &'static str),
    #[error("network error: {0}")]
    Network(String),
    #[error("asset compression failed: {0}")]
    Compression(String),
    #[error("worker has shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure establishing or restoring a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("staff profile {0} cannot be unlocked offline")]
    NotEligible(i64),
    #[error("credential vault error: {0}")]
    Vault(String),
    #[error(transparent)]
    Remote(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Order draft validation failure.
#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("order has no items")]
    Empty,
    #[error("menu item {0} is not in the local menu")]
    UnknownItem(i64),
    #[error("{name} is unavailable")]
    Unavailable { item_id: i64, name: String },
    #[error("{name} is out of stock")]
    OutOfStock { item_id: i64, name: String },
    #[error("quantity for item {item_id} must be at least 1 (got {quantity})")]
    InvalidQuantity { item_id: i64, quantity: i64 },
}
