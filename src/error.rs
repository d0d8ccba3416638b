//! Failure taxonomy for the execution core

use crate::value::Value;
use thiserror::Error;

/// Failure kind tag, used to pick the Error prototype a failure is reified with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Type,
    Range,
    Reference,
    Syntax,
    Eval,
}

impl ErrorKind {
    /// Constructor name of the matching Error subclass
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Eval => "EvalError",
        }
    }
}

/// Main error type threaded through every fallible operation
#[derive(Debug, Error)]
pub enum JsError {
    #[error("TypeError: {message}")]
    TypeError { message: String },

    #[error("RangeError: {message}")]
    RangeError { message: String },

    #[error("ReferenceError: {message}")]
    ReferenceError { message: String },

    #[error("SyntaxError: {message}")]
    SyntaxError { message: String },

    #[error("EvalError: {message}")]
    EvalError { message: String },

    /// A script-level value in flight: a `throw`, or a failure already reified as a value
    #[error("uncaught exception")]
    Thrown { value: Value },

    /// Broken engine invariant (stale handle, malformed bytecode)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsError {
    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::TypeError {
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        JsError::RangeError {
            message: message.into(),
        }
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        JsError::ReferenceError {
            message: message.into(),
        }
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        JsError::SyntaxError {
            message: message.into(),
        }
    }

    pub fn eval_error(message: impl Into<String>) -> Self {
        JsError::EvalError {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    pub fn thrown(value: Value) -> Self {
        JsError::Thrown { value }
    }

    /// Reference failure for an identifier that resolves nowhere
    pub fn not_defined(name: &str) -> Self {
        JsError::reference_error(format!("\"{}\" not defined", name))
    }

    /// Failure kind, or `None` for thrown values and internal errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            JsError::TypeError { .. } => Some(ErrorKind::Type),
            JsError::RangeError { .. } => Some(ErrorKind::Range),
            JsError::ReferenceError { .. } => Some(ErrorKind::Reference),
            JsError::SyntaxError { .. } => Some(ErrorKind::Syntax),
            JsError::EvalError { .. } => Some(ErrorKind::Eval),
            JsError::Thrown { .. } | JsError::Internal(_) => None,
        }
    }

    /// Message carried by a typed failure
    pub fn message(&self) -> Option<&str> {
        match self {
            JsError::TypeError { message }
            | JsError::RangeError { message }
            | JsError::ReferenceError { message }
            | JsError::SyntaxError { message }
            | JsError::EvalError { message } => Some(message),
            JsError::Thrown { .. } => None,
            JsError::Internal(message) => Some(message),
        }
    }
}
