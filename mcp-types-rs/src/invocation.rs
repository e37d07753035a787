//! Inbound tool invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single inbound `tools/call` request, created per request and immutable
/// for its lifetime. The `correlation_id` ties all derived log and metric
/// events back to this request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Name of the tool being invoked
    pub tool_name: String,
    /// Raw arguments as supplied by the caller
    pub arguments: Map<String, Value>,
    /// Identity the rate limiter keys on (token, API key, or "anonymous")
    pub caller_identity: String,
    /// Unique per-request identifier for tracing
    pub correlation_id: String,
    /// Time the request was received
    pub received_at: DateTime<Utc>,
}

impl Invocation {
    /// Creates a new invocation with a fresh correlation ID.
    pub fn new<S: Into<String>>(
        tool_name: S,
        arguments: Map<String, Value>,
        caller_identity: S,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            caller_identity: caller_identity.into(),
            correlation_id: Uuid::new_v4().to_string(),
            received_at: Utc::now(),
        }
    }
}
