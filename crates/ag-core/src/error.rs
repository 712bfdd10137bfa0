//! # SyncError
//!
//! Centralized error handling for the Agora sync engine.
//! Every remote failure is mapped onto one of these variants before it
//! reaches a mutation boundary.

use thiserror::Error;

/// The primary error type for all ag-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient transport failure (request rejected, timeout, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// Session expired or credentials rejected. Never retried.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server rejected the change because the client state was stale.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A batch call (mark-all-as-read) did not fully apply.
    #[error("partial batch failure: {0}")]
    PartialBatch(String),

    /// Resource not found (e.g., Thread, Post, Notification)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty reply)
    #[error("validation error: {0}")]
    Validation(String),

    /// The owning surface was unmounted before the operation settled.
    #[error("surface disposed")]
    Disposed,
}

impl SyncError {
    /// Failures that a later poll tick or a repeated user action may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::PartialBatch(_))
    }

    /// Failures after which the affected entity must be refetched from the
    /// server instead of trusting the restored local snapshot.
    pub fn requires_refetch(&self) -> bool {
        matches!(self, SyncError::Conflict(_) | SyncError::PartialBatch(_))
    }
}

/// A specialized Result type for Agora sync logic.
pub type Result<T> = std::result::Result<T, SyncError>;
