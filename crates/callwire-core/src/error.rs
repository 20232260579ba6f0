//! Error types for the call pipeline.
//!
//! Errors are split by the side of the wire they surface on:
//! - [`CallError`] is what a caller of [`crate::Client::execute`] receives.
//! - [`ExecutionError`] is raised while resolving and invoking a callable on
//!   the server and is mapped onto a JSON-RPC error object.
//! - [`ConfigError`] is raised while wiring things together and never at call time.

use crate::protocol::codes;
use serde_json::Value;
use thiserror::Error;

/// Error delivered to the caller of a remote call.
///
/// `Clone` so that a single transport failure can be delivered to every call
/// that was waiting on the same batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    // Transport errors (no JSON-RPC code)
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    // Application errors returned inside a JSON-RPC error object
    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Message id missing in the response: {id}")]
    MissingId { id: String },

    #[error("Correlation id {id} is already pending in group {group}")]
    DuplicateId { id: String, group: String },

    // Errors raised inside the client's middleware chain
    #[error("{message}")]
    Handler { message: String },

    #[error("Middleware handler panicked: {message}")]
    Panicked { message: String },
}

impl CallError {
    /// Shorthand for an error raised by a middleware handler.
    pub fn handler(message: impl Into<String>) -> Self {
        CallError::Handler {
            message: message.into(),
        }
    }

    /// Shorthand for a connectivity failure.
    pub fn transport(message: impl Into<String>) -> Self {
        CallError::Transport {
            message: message.into(),
        }
    }

    /// JSON-RPC error code carried by the error, if any.
    ///
    /// Only application errors carry a code. Transport failures, missing ids
    /// and local middleware errors return `None`.
    pub fn code(&self) -> Option<i64> {
        match self {
            CallError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the error came from the wire exchange rather than the remote callable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CallError::Transport { .. } | CallError::InvalidResponse { .. }
        )
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<crate::middleware::HandlerPanic> for CallError {
    fn from(panic: crate::middleware::HandlerPanic) -> Self {
        CallError::Panicked {
            message: panic.message,
        }
    }
}

/// Error raised while resolving or invoking a callable on the server.
#[derive(Debug, Error)]
pub enum ExecutionError {
    // Resolution errors
    #[error("Function {name} was not found.")]
    FunctionNotFound { name: String },

    #[error("Class {name} was not found.")]
    ClassNotFound { name: String },

    #[error("Unable to find method {class}.{method}")]
    MethodNotFound { class: String, method: String },

    #[error("Unable to create an instance of class {class}.")]
    InstanceUnavailable { class: String },

    #[error("Instance produced for class {class} has an unexpected type")]
    InstanceTypeMismatch { class: String },

    // Invocation errors
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("{message}")]
    Application { message: String },

    #[error("Callable panicked: {message}")]
    Panicked { message: String },

    #[error("JSON error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl ExecutionError {
    /// Shorthand for a failure reported by a user callable.
    pub fn application(message: impl Into<String>) -> Self {
        ExecutionError::Application {
            message: message.into(),
        }
    }

    /// Structured error whose code is passed through to the JSON-RPC response.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        ExecutionError::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// - -32602: Invalid params
    /// - -32603: Internal error (default for anything a callable raises)
    /// - any code chosen by the callable through [`ExecutionError::Rpc`]
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            ExecutionError::Rpc { code, .. } => *code,
            ExecutionError::InvalidParams { .. } => codes::INVALID_PARAMS,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Optional `data` member for the JSON-RPC error object.
    pub fn rpc_error_data(&self) -> Option<Value> {
        match self {
            ExecutionError::Rpc { data, .. } => data.clone(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::Serialization {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Error raised while configuring clients, transports or executors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Name conflicts found for \"{name}\". Definitions found in {}", sources.join(", "))]
    NameConflict { name: String, sources: Vec<String> },

    #[error("Invalid transport URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid option {option}: {message}")]
    InvalidOption { option: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rpc_errors_carry_a_code() {
        let rpc = CallError::Rpc {
            code: 409,
            message: "Conflict".into(),
            data: None,
        };
        assert_eq!(rpc.code(), Some(409));
        assert_eq!(rpc.to_string(), "Conflict");

        let transport = CallError::transport("connection refused");
        assert_eq!(transport.code(), None);
        assert!(transport.is_transport());
        assert!(!rpc.is_transport());
    }

    #[test]
    fn test_execution_error_codes() {
        assert_eq!(
            ExecutionError::application("Conflict").to_rpc_error_code(),
            -32603
        );
        assert_eq!(
            ExecutionError::InvalidParams {
                message: "x".into()
            }
            .to_rpc_error_code(),
            -32602
        );
        assert_eq!(ExecutionError::rpc(409, "Conflict").to_rpc_error_code(), 409);
        assert_eq!(
            ExecutionError::FunctionNotFound { name: "f".into() }.to_string(),
            "Function f was not found."
        );
    }

    #[test]
    fn test_name_conflict_lists_sources() {
        let err = ConfigError::NameConflict {
            name: "A.x".into(),
            sources: vec!["a.rs".into(), "b.rs".into()],
        };
        assert_eq!(
            err.to_string(),
            "Name conflicts found for \"A.x\". Definitions found in a.rs, b.rs"
        );
    }
}
