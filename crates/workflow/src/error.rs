//! Error types for the workflow services.
//!
//! # HTTP mapping
//!
//! | Error | Status |
//! |-------|--------|
//! | InvalidRequest | 400 |
//! | Storage validation (invalid patch, document or request) | 400 |
//! | everything else | 500 |
//!
//! [`WorkflowError::public_message`] is what a caller may show to a client:
//! backend error bodies never reach it.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use annolab_persistence::{BulkReport, StorageError};
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// The primary error type for workflow operations.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A store operation failed.
    #[error(transparent)]
    Storage(StorageError),

    /// The request failed validation before anything was read or written.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The sequence generator could not mint a code.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// A study has more completed tasks than tasks.
    #[error("study {study_id} reports {completed} completed tasks out of {total}")]
    ConsistencyViolation {
        study_id: String,
        completed: u64,
        total: u64,
    },

    /// Some documents of a bulk write were not indexed.
    #[error("bulk write partially failed: {indexed} indexed, {errored} errored")]
    PartialBulkFailure { indexed: usize, errored: usize },

    /// An external collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The object queue has no free slot.
    #[error("object expansion queue is full")]
    QueueFull,

    /// The object queue's worker is gone.
    #[error("object expansion queue is closed")]
    QueueClosed,

    /// The caller cancelled the operation.
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },
}

/// Failures of the sequence generator.
#[derive(Error, Debug)]
pub enum SequenceError {
    /// The service could not be reached.
    #[error("sequence service unreachable: {message}")]
    Transport { message: String },

    /// The service did not answer within the timeout.
    #[error("sequence service timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The service answered with a non-success status.
    #[error("sequence service answered {status}")]
    Status { status: u16 },

    /// The response body lacks a usable `last_insert_id`.
    #[error("invalid sequence response: {message}")]
    InvalidResponse { message: String },
}

impl WorkflowError {
    /// Shorthand for [`WorkflowError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        WorkflowError::InvalidRequest {
            message: message.into(),
        }
    }

    /// HTTP status a handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::InvalidRequest { .. } => 400,
            WorkflowError::Storage(e) if e.is_client_error() => 400,
            _ => 500,
        }
    }

    /// Message safe to return to a client.
    pub fn public_message(&self) -> String {
        match self {
            WorkflowError::InvalidRequest { message } => message.clone(),
            WorkflowError::Storage(e) if e.is_client_error() => e.to_string(),
            WorkflowError::Cancelled { operation } => format!("{} was cancelled", operation),
            _ => "internal server error".to_string(),
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled { operation } => WorkflowError::Cancelled { operation },
            other => WorkflowError::Storage(other),
        }
    }
}

/// Result type alias for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Turns a [`BulkReport`] into an error for callers that want one.
pub trait BulkReportExt: Sized {
    /// `PartialBulkFailure` if any document errored, `Cancelled` if any was
    /// skipped, the report otherwise.
    fn into_result(self) -> WorkflowResult<BulkReport>;
}

impl BulkReportExt for BulkReport {
    fn into_result(self) -> WorkflowResult<BulkReport> {
        if self.errored > 0 {
            return Err(WorkflowError::PartialBulkFailure {
                indexed: self.indexed,
                errored: self.errored,
            });
        }
        if self.skipped > 0 {
            return Err(WorkflowError::Cancelled {
                operation: "bulk write".to_string(),
            });
        }
        Ok(self)
    }
}
