//! Error types for pathstate operations.

use crate::{Path, Value};
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by dispatch, registration and lifecycle calls.
///
/// Every variant except [`StoreError::Persistence`] refuses the write that
/// triggered it; the current snapshot is left untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An action was dispatched without an operation kind.
    #[error("action must have an operation kind")]
    MissingKind,

    /// Kind not present in the operation registry.
    #[error("no reducer found for action type \"{kind}\"")]
    UnknownOperation {
        /// The lookup key that was not found.
        kind: String,
    },

    /// Attempt to register a custom reducer under a built-in kind.
    #[error("operation kind \"{kind}\" is reserved for a built-in operation")]
    ReservedKind {
        /// The reserved kind.
        kind: String,
    },

    /// Custom kinds must be non-empty and contain no whitespace.
    #[error("invalid operation kind {kind:?}")]
    InvalidKind {
        /// The rejected kind.
        kind: String,
    },

    /// A shape-requiring operation found the wrong type at its target.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The path where the mismatch occurred.
        path: Path,
        /// The expected type.
        expected: &'static str,
        /// The actual type found.
        found: &'static str,
    },

    /// Array segment outside the array.
    #[error("index {index} out of bounds (len: {len}) at path {path}")]
    IndexOutOfBounds {
        /// The path to the array element.
        path: Path,
        /// The index that was accessed.
        index: usize,
        /// The actual length of the array.
        len: usize,
    },

    /// Path-targeted write without a usable path.
    #[error("invalid path \"{path}\": {reason}")]
    InvalidPath {
        /// The offending path.
        path: Path,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A JSON-encoded action could not be decoded into its operation.
    #[error("invalid payload for {kind}: {message}")]
    InvalidPayload {
        /// Lookup key of the action.
        kind: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Any read or write before `set_initial_state`.
    #[error("state container used before set_initial_state")]
    NotInitialized,

    /// A reducer returned a deferred result outside a tokio runtime.
    #[error("deferred reduction requires a running tokio runtime")]
    NoAsyncRuntime,

    /// Storage failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl StoreError {
    #[inline]
    pub fn unknown_operation(kind: impl Into<String>) -> Self {
        StoreError::UnknownOperation { kind: kind.into() }
    }

    #[inline]
    pub fn type_mismatch(path: Path, expected: &'static str, found: Option<&Value>) -> Self {
        StoreError::TypeMismatch {
            path,
            expected,
            found: value_type_name(found),
        }
    }

    #[inline]
    pub fn index_out_of_bounds(path: Path, index: usize, len: usize) -> Self {
        StoreError::IndexOutOfBounds { path, index, len }
    }

    #[inline]
    pub fn invalid_path(path: Path, reason: &'static str) -> Self {
        StoreError::InvalidPath { path, reason }
    }

    #[inline]
    pub fn invalid_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Errors from session storage backends.
///
/// These never reach a dispatch caller: the persistence adapter logs them and
/// keeps the in-memory snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage key is unusable (path traversal, control characters, ...).
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// Backend-specific failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Type name of a possibly-undefined value.
#[inline]
pub fn value_type_name(v: Option<&Value>) -> &'static str {
    v.map_or("undefined", Value::type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = StoreError::type_mismatch(Path::parse("person.name"), "array", Some(&"Ann".into()));
        assert_eq!(
            err.to_string(),
            "type mismatch at person.name: expected array, found string"
        );

        let err = StoreError::unknown_operation("shout");
        assert!(err.to_string().contains("\"shout\""));
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(value_type_name(None), "undefined");
        assert_eq!(value_type_name(Some(&Value::from(json!(null)))), "null");
        assert_eq!(value_type_name(Some(&Value::from(json!([1])))), "array");
    }

    #[test]
    fn test_persistence_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: StoreError = PersistenceError::from(io).into();
        assert!(matches!(err, StoreError::Persistence(PersistenceError::Io(_))));
        assert!(err.to_string().contains("disk full"));
    }
}
