//! Error types for the persistence layer.
//!
//! Errors are grouped by who is at fault: the backend (transport failures and
//! structured rejections), the addressed document (missing, rejected write),
//! the caller (validation), or a concurrent writer (version conflicts).

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Document state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Optimistic concurrency errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Caller supplied data that fails a precondition
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller cancelled a long-running operation between pages or batches.
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },
}

/// Errors related to the addressed document.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Zero documents matched. Distinct from a transport failure.
    #[error("{collection} not found: {criteria}")]
    NotFound { collection: String, criteria: String },

    /// The backend accepted the request but did not create the document.
    #[error("write rejected for {collection}/{id}: {message}")]
    WriteRejected {
        collection: String,
        id: String,
        message: String,
    },
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The document changed between the read and the write of an update.
    #[error("version conflict on {collection}/{id}: expected seq_no {expected_seq_no}")]
    VersionConflict {
        collection: String,
        id: String,
        expected_seq_no: i64,
    },

    /// Every retry of a conflicting update lost the race.
    #[error("update of {collection}/{id} still conflicting after {attempts} attempts")]
    RetriesExhausted {
        collection: String,
        id: String,
        attempts: u32,
    },
}

/// Errors raised before anything is sent to the backend.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A request argument failed a precondition.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// A typed patch failed validation.
    #[error("invalid patch for {collection}: {message}")]
    InvalidPatch { collection: String, message: String },

    /// A document failed its structural rules.
    #[error("invalid {collection} document: {message}")]
    InvalidDocument { collection: String, message: String },
}

/// Errors originating from the search backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend could not be reached or the connection broke mid-request.
    #[error("transport error talking to {backend_name}: {message}")]
    Transport {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend answered with a structured error body.
    #[error("{backend_name} rejected request ({status}): {error_type}: {reason}")]
    Rejected {
        backend_name: String,
        status: u16,
        error_type: String,
        reason: String,
    },

    /// The backend is reachable but reports itself unhealthy.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl StorageError {
    /// Shorthand for [`ValidationError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        StorageError::Validation(ValidationError::InvalidRequest {
            message: message.into(),
        })
    }

    /// Shorthand for [`ResourceError::NotFound`].
    pub fn not_found(collection: impl Into<String>, criteria: impl Into<String>) -> Self {
        StorageError::Resource(ResourceError::NotFound {
            collection: collection.into(),
            criteria: criteria.into(),
        })
    }

    /// Returns true if zero documents matched.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns true if the error is a detectable lost-update race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::Concurrency(ConcurrencyError::VersionConflict { .. })
        )
    }

    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::not_found("tasks", "_id=t-1");
        assert_eq!(err.to_string(), "tasks not found: _id=t-1");
        assert!(err.is_not_found());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_rejected_display() {
        let err = StorageError::Backend(BackendError::Rejected {
            backend_name: "elasticsearch".to_string(),
            status: 400,
            error_type: "parsing_exception".to_string(),
            reason: "unknown query [bogus]".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "elasticsearch rejected request (400): parsing_exception: unknown query [bogus]"
        );
    }

    #[test]
    fn test_conflict_classification() {
        let err = StorageError::Concurrency(ConcurrencyError::VersionConflict {
            collection: "studies".to_string(),
            id: "s-1".to_string(),
            expected_seq_no: 4,
        });
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_validation_is_client_error() {
        assert!(StorageError::invalid_request("size must be positive").is_client_error());
        let err = StorageError::Validation(ValidationError::InvalidPatch {
            collection: "tasks".to_string(),
            message: "empty patch".to_string(),
        });
        assert!(err.is_client_error());
    }

    #[test]
    fn test_from_serde_json() {
        let err: StorageError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(
            err,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
