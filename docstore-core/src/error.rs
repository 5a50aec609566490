//! Error types and result types for document store operations.
//!
//! This module provides the error taxonomy shared by the connection factory, the store
//! and every backend. Use [`DocumentStoreResult<T>`] as the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// Validation variants ([`InvalidDescriptor`](Self::InvalidDescriptor),
/// [`InvalidDocument`](Self::InvalidDocument)) are always reported before any I/O is attempted.
/// A single-document lookup that matches nothing is not an error at all: it is reported as
/// `Ok(false)` by [`Store::find_one`](crate::store::Store::find_one).
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// A configuration is already registered under this key.
    #[error("Connection key already registered: {0}")]
    DuplicateKey(String),
    /// No configuration was ever registered under this key.
    #[error("Unknown connection key: {0}")]
    UnknownKey(String),
    /// Connecting to or pinging the backend failed while establishing a connection.
    /// The first argument is the connection key, the second the underlying reason.
    #[error("Connection failure for {0}: {1}")]
    ConnectionFailure(String, String),
    /// A query descriptor is missing a required filter, update payload, pipeline or destination.
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
    /// The document is missing, has no identifier where one is required, or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between documents and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// The caller cancelled the operation before it completed.
    #[error("Operation cancelled")]
    Cancelled,
    /// The caller's deadline expired before the operation completed.
    #[error("Operation timed out")]
    TimedOut,
}

impl DocumentStoreError {
    /// Prefixes backend and serialization failures with the operation and collection that
    /// produced them. Every other variant is returned unchanged.
    pub fn context(self, operation: &str, collection: &str) -> Self {
        match self {
            DocumentStoreError::Backend(msg) => {
                DocumentStoreError::Backend(format!("{operation} on {collection}: {msg}"))
            }
            DocumentStoreError::Serialization(msg) => {
                DocumentStoreError::Serialization(format!("{operation} on {collection}: {msg}"))
            }
            other => other,
        }
    }

    /// Returns `true` if the caller's context ended the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DocumentStoreError::Cancelled | DocumentStoreError::TimedOut)
    }
}

/// A specialized `Result` type for document store operations.
///
/// This type alias is used throughout the crate to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_backend_errors_only() {
        let err = DocumentStoreError::Backend("socket closed".into()).context("find_many", "orders");
        assert_eq!(err.to_string(), "Backend error: find_many on orders: socket closed");

        let err = DocumentStoreError::InvalidDescriptor("filter required".into())
            .context("update_one", "orders");
        assert_eq!(err.to_string(), "Invalid descriptor: filter required");
    }

    #[test]
    fn cancellation_kinds() {
        assert!(DocumentStoreError::Cancelled.is_cancellation());
        assert!(DocumentStoreError::TimedOut.is_cancellation());
        assert!(!DocumentStoreError::Backend("x".into()).is_cancellation());
    }
}
