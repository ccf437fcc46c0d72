use thiserror::Error;

use crate::db::BackendError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure dbkit surfaces to callers.
///
/// Conversion and compilation errors are never swallowed: they abort the
/// enclosing operation and reach the caller as one of these variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A value could not cross the encode/decode boundary of a backend.
    #[error("{backend} cannot represent {type_name}")]
    UnsupportedType {
        backend: &'static str,
        type_name: String,
    },

    /// Checked numeric narrowing failed.
    #[error("{value} does not fit in {target}")]
    NumericOverflow { value: String, target: &'static str },

    /// The dialect or backend lacks a requested capability.
    #[error("{dialect} does not support {operation}")]
    UnsupportedOperation {
        dialect: &'static str,
        operation: String,
    },

    /// A predicate shape has no compilation rule.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("object not found")]
    ObjectNotFound,

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// A transaction was started from a call path that already holds the
    /// connection. Waiting would never finish.
    #[error("transaction deadlock: the connection is already held by this call path")]
    TransactionDeadlock,

    /// Rolling back after a failure failed as well. The rollback failure is
    /// the primary error; the error that triggered it is kept alongside.
    #[error("rollback failed: {rollback} (after: {original})")]
    RollbackFailed {
        rollback: Box<Error>,
        original: Box<Error>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Malformed bytes on the wire.
    #[error("malformed wire value: {0}")]
    Codec(String),
}

impl Error {
    pub(crate) fn unsupported_type(backend: &'static str, type_name: impl Into<String>) -> Self {
        Error::UnsupportedType {
            backend,
            type_name: type_name.into(),
        }
    }

    pub(crate) fn unsupported_operation(dialect: &'static str, operation: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            dialect,
            operation: operation.into(),
        }
    }

    pub(crate) fn invalid_expression(message: impl Into<String>) -> Self {
        Error::InvalidExpression(message.into())
    }

    /// Serialization failures and detected deadlocks: the only errors the
    /// executor's retry loop acts on.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Backend(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Backend error code (SQLSTATE or vendor code), if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Backend(err) if !err.code.is_empty() => Some(err.code.as_str()),
            _ => None,
        }
    }
}
