//! Tool results and the structured execution-error model.
//!
//! Validation and business failures are data, not protocol faults: the
//! pipeline maps every fault into an [`ExecutionError`] so the calling agent
//! can read the code, the retryable flag, and the field-level detail and
//! self-correct without human intervention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Caller-facing error codes surfaced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Admission rejected by the token bucket
    RateLimited,
    /// Missing, malformed, or expired credentials
    Unauthorized,
    /// Valid credentials lacking a required scope
    Forbidden,
    /// No handler registered under the requested tool name
    NotFound,
    /// Arguments failed schema validation
    InvalidInput,
    /// Circuit open or retries exhausted against the upstream
    ServiceUnavailable,
    /// Deadline exceeded
    Timeout,
    /// Batch operation where only some items succeeded
    PartialFailure,
    /// Everything else
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::PartialFailure => "PARTIAL_FAILURE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A structured tool-execution error.
///
/// Messages never expose internal schema or stack detail; only field-level
/// validation detail is allowed into `details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Error category
    pub code: ErrorCode,
    /// Human-readable message, safe for external callers
    pub message: String,
    /// Structured detail (field errors, retry hints, upstream name)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// Whether the caller may usefully retry the same request
    pub retryable: bool,
    /// Correlation ID for operator trace lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ExecutionError {
    /// Creates a new execution error. Defaults to non-retryable.
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
            retryable: false,
            correlation_id: None,
        }
    }

    /// Sets the retryable flag
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Adds a structured detail entry
    pub fn detail<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.into(), value);
        }
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Outcome of a dispatched invocation. Exactly one variant is populated by
/// construction; the serializer never has to reconcile both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    /// Handler output plus response metadata
    Success {
        data: Value,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Structured tool-execution error
    Error(ExecutionError),
}

impl ToolResult {
    /// Wraps handler output as a success result.
    pub fn success(data: Value) -> Self {
        ToolResult::Success {
            data,
            metadata: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// Returns the execution error, if any.
    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            ToolResult::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Attaches the correlation ID and completion timestamp to the result,
    /// whichever variant it is.
    pub fn with_trace(mut self, correlation_id: &str, completed_at: DateTime<Utc>) -> Self {
        match &mut self {
            ToolResult::Success { metadata, .. } => {
                metadata.insert(
                    "correlation_id".to_string(),
                    Value::String(correlation_id.to_string()),
                );
                metadata.insert(
                    "timestamp".to_string(),
                    Value::String(completed_at.to_rfc3339()),
                );
            }
            ToolResult::Error(err) => {
                err.correlation_id = Some(correlation_id.to_string());
                err.details.insert(
                    "timestamp".to_string(),
                    Value::String(completed_at.to_rfc3339()),
                );
            }
        }
        self
    }
}
