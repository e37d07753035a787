//! Faults raised by tool handlers.
//!
//! Handlers return these instead of ad-hoc error strings so the classifier
//! can make retry decisions without guessing at message text.

use serde_json::Value;
use thiserror::Error;

/// A fault raised by a tool handler or the transport underneath it.
#[derive(Error, Debug)]
pub enum Fault {
    /// Connection dropped mid-request
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Name resolution failed
    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),

    /// Upstream answered with an HTTP-equivalent status code
    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    /// A deadline elapsed before the operation completed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Memory, connection-pool, or file-descriptor exhaustion
    #[error("resource exhausted ({resource}): {message}")]
    ResourceExhausted { resource: String, message: String },

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An argument failed handler-side validation
    #[error("invalid argument `{field}`: {message}")]
    InvalidArgument { field: String, message: String },

    /// A batch operation where some items succeeded and some failed
    #[error("partial failure: {} succeeded, {} failed", succeeded.len(), failed.len())]
    Partial {
        succeeded: Vec<Value>,
        failed: Vec<Value>,
    },

    /// Anything the taxonomy does not recognize
    #[error("{0}")]
    Other(String),
}

impl Fault {
    /// Create a connection-reset fault
    pub fn connection_reset(message: impl Into<String>) -> Self {
        Fault::ConnectionReset(message.into())
    }

    /// Create a DNS-failure fault
    pub fn dns_failure(host: impl Into<String>) -> Self {
        Fault::DnsFailure(host.into())
    }

    /// Create an upstream-status fault
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Fault::UpstreamStatus {
            status,
            message: message.into(),
        }
    }

    /// Create a deadline-exceeded fault
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Fault::DeadlineExceeded(message.into())
    }

    /// Create a resource-exhaustion fault
    pub fn resource_exhausted(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Fault::ResourceExhausted {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a not-found fault
    pub fn not_found(message: impl Into<String>) -> Self {
        Fault::NotFound(message.into())
    }

    /// Create a forbidden fault
    pub fn forbidden(message: impl Into<String>) -> Self {
        Fault::Forbidden(message.into())
    }

    /// Create an invalid-argument fault
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Fault::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unclassified fault
    pub fn other(message: impl Into<String>) -> Self {
        Fault::Other(message.into())
    }
}
