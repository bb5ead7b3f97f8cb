//! Error kinds shared by every component of the sync core.
//!
//! Every failure is scoped to one connection, one message or one job run;
//! nothing here is process-fatal.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

/// Errors raised by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Document (or a referenced record) does not exist.
    #[error("document not found: {0}")]
    NotFound(Uuid),

    /// Resolved access level is insufficient for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No principal could be attached to the connection.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A delta, frame or control message failed to parse.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An external collaborator (correction service, notifier) failed.
    #[error("dependency failure: {0}")]
    TransientDependencyFailure(String),

    /// Underlying store failure.
    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SyncError::NotFound(id),
            other => SyncError::Storage(other),
        }
    }
}

impl SyncError {
    pub fn denied(reason: impl Into<String>) -> Self {
        SyncError::PermissionDenied(reason.into())
    }

    pub fn malformed(reason: impl ToString) -> Self {
        SyncError::MalformedPayload(reason.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
