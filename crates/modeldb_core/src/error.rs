//! Error types for ModelDB core.

use crate::types::{FieldId, LockId, ModelId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in ModelDB store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lock could not be acquired within the deadlock timeout.
    ///
    /// The calling transaction should be abandoned and retried.
    #[error("deadlock detected while waiting for {resource}")]
    Deadlock {
        /// The resource whose lock timed out.
        resource: LockId,
    },

    /// An instance lookup failed.
    #[error("instance not found in {model}: {key}")]
    InstanceNotFound {
        /// The store or index that was searched.
        model: String,
        /// Description of the key that was looked up.
        key: String,
    },

    /// A transaction was used from a thread other than the one that began it.
    #[error("transaction used from a thread that does not own it")]
    WrongThread,

    /// An instance or record names a model type that is not registered.
    #[error("unknown model type: {name}")]
    UnknownModel {
        /// The model type name.
        name: String,
    },

    /// No index is registered for the requested field set.
    #[error("no index registered for fields {fields}")]
    IndexNotFound {
        /// The requested field set.
        fields: String,
    },

    /// A field id is not declared by the model type.
    #[error("field not found: {field}")]
    FieldNotFound {
        /// The field id.
        field: FieldId,
    },

    /// A value does not have the type a field or key expects.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The expected type.
        expected: String,
        /// The type that was supplied.
        found: String,
    },

    /// An imported record reuses an id already present in the store.
    #[error("duplicate instance id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: ModelId,
    },

    /// An internal consistency check failed.
    #[error("invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violation.
        message: String,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the error.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates an instance not found error.
    pub fn instance_not_found(model: impl Into<String>, key: impl ToString) -> Self {
        Self::InstanceNotFound {
            model: model.into(),
            key: key.to_string(),
        }
    }

    /// Creates an unknown model error.
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if the error is a lock timeout.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }

    /// Returns `true` if the error is a failed instance lookup.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InstanceNotFound { .. })
    }
}
