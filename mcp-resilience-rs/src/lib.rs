//! # Resilience layer
//!
//! Fault handling for calls into flaky upstream dependencies:
//!
//! - [`Fault`] - the taxonomy of faults a tool handler can raise
//! - [`ErrorClassifier`] - pure categorization of faults into retry classes
//! - [`CircuitBreakerRegistry`] - per-upstream Closed/Open/HalfOpen state machines
//! - [`RetryExecutor`] - exponential backoff with jitter, gated by the breaker

pub mod circuit_breaker;
pub mod classifier;
pub mod fault;
pub mod retry;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use classifier::{ErrorClassifier, FaultKind};
pub use fault::Fault;
pub use retry::{RetryConfig, RetryExecutor};
