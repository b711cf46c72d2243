//! Tool-specific error types.
//!
//! Three families live here:
//! - [`ValidationError`]: arguments rejected before execution starts
//! - [`ExecutionError`]: a tool ran and failed; carries a [`ExecutionErrorKind`]
//!   and a `retryable` hint for the client
//! - [`ToolError`]: registry-level failures (unknown or duplicate tool, bad
//!   input schema) plus the two above

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// The call exceeded its deadline.
    Timeout,
    /// The computation is undefined (division by zero, overflow, NaN).
    InvalidOperation,
    /// The remote side could not be reached.
    Unreachable,
    /// The target or location does not exist or is not allowed.
    InvalidTarget,
    /// The upstream provider answered with an error or an unusable payload.
    UpstreamError,
    /// The call was cancelled by the client or by session teardown.
    Cancelled,
    /// The tool itself misbehaved (panic, internal inconsistency).
    Internal,
}

impl ExecutionErrorKind {
    /// Stable name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::InvalidOperation => "InvalidOperation",
            Self::Unreachable => "Unreachable",
            Self::InvalidTarget => "InvalidTarget",
            Self::UpstreamError => "UpstreamError",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool execution failure, reported to the client inside the result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Deadline exceeded. Always retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Timeout, message, true)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::InvalidOperation, message, false)
    }

    pub fn unreachable(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ExecutionErrorKind::Unreachable, message, retryable)
    }

    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::InvalidTarget, message, false)
    }

    pub fn upstream(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ExecutionErrorKind::UpstreamError, message, retryable)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Cancelled, message, true)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Internal, message, false)
    }
}

/// Arguments did not satisfy the tool's input contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The offending argument, when one can be named.
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Errors that can occur during tool operations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found.
    #[error("Unknown tool: {0}")]
    NotFound(String),

    /// A tool with the same name is already registered.
    #[error("Duplicate tool name: {0}")]
    Duplicate(String),

    /// The tool's input schema could not be compiled.
    #[error("Invalid input schema for tool '{name}': {message}")]
    InvalidSchema { name: String, message: String },

    /// Invalid arguments were provided to the tool.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(#[from] ValidationError),

    /// The tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(#[from] ExecutionError),
}

impl ToolError {
    /// Create a new "not found" error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a new "duplicate" error.
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::Duplicate(name.into())
    }

    pub fn invalid_schema(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new "invalid arguments" error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(ValidationError::new(msg))
    }

    /// Name of the error family, as reported in JSON-RPC error data.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "UnknownToolError",
            Self::Duplicate(_) => "DuplicateToolError",
            Self::InvalidSchema { .. } => "SchemaError",
            Self::InvalidArguments(_) => "ValidationError",
            Self::ExecutionFailed(_) => "ExecutionError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = ExecutionError::timeout("too slow");
        assert_eq!(err.kind, ExecutionErrorKind::Timeout);
        assert!(err.retryable);
    }

    #[test]
    fn test_execution_error_wire_shape() {
        let err = ExecutionError::invalid_operation("Division by zero");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "InvalidOperation");
        assert_eq!(value["message"], "Division by zero");
        assert_eq!(value["retryable"], false);
    }

    #[test]
    fn test_tool_error_kind_names() {
        assert_eq!(ToolError::not_found("x").kind_name(), "UnknownToolError");
        assert_eq!(ToolError::duplicate("x").kind_name(), "DuplicateToolError");
        assert_eq!(
            ToolError::invalid_arguments("bad").kind_name(),
            "ValidationError"
        );
    }
}
