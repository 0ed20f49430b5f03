//! Error types for script execution

use mscript_common::Error as CommonError;
use mscript_storage::StorageError;
use thiserror::Error;

use crate::job::ScriptJob;

/// Error types for VM operations
#[derive(Error, Debug)]
pub enum VMError {
    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Cannot convert '{value}' to {expected} for property {property}")]
    CoercionError {
        property: String,
        value: String,
        expected: &'static str,
    },

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("State error: {0}")]
    StateError(String),

    /// The script did not pass validation. The boxed job is never tracked;
    /// its errors are only available here.
    #[error("Script validation failed with {} error(s)", .0.errors.len())]
    ValidationFailed(Box<ScriptJob>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission error: {0}")]
    PermissionError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StorageError> for VMError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::KeyNotFound(key) => VMError::NotFound(key),
            other => VMError::StorageError(other.to_string()),
        }
    }
}

// Convert from VMError to the shared error type
impl From<VMError> for CommonError {
    fn from(err: VMError) -> Self {
        let message = err.to_string();
        match err {
            VMError::NotFound(msg) => CommonError::NotFound(msg),
            VMError::ValidationFailed(_) => CommonError::Validation(message),
            _ => CommonError::Other(message),
        }
    }
}

/// Result type for VM operations
pub type Result<T> = std::result::Result<T, VMError>;
