//! Pure fault classification.

use serde::{Deserialize, Serialize};

use crate::fault::Fault;

/// Retry class of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Likely to succeed on retry (network blips, 5xx)
    Transient,
    /// Will never succeed on retry (not found, forbidden, bad input)
    Permanent,
    /// A deadline elapsed
    Timeout,
    /// Memory, connections, or descriptors ran out
    ResourceExhaustion,
    /// Batch operation with mixed per-item outcomes
    PartialFailure,
}

impl FaultKind {
    /// Whether the retry executor may attempt this kind again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaultKind::Transient | FaultKind::Timeout | FaultKind::ResourceExhaustion
        )
    }
}

/// Categorizes faults into retry classes. Pure and deterministic: the same
/// fault always yields the same kind.
///
/// Unrecognized fault shapes fall back to a configurable default. Transient
/// matches the documented behavior, but callers that prefer not to retry
/// unknown faults can construct the classifier with a stricter default.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    unknown_default: FaultKind,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            unknown_default: FaultKind::Transient,
        }
    }
}

impl ErrorClassifier {
    /// Classifier with an explicit policy for unrecognized faults.
    pub fn with_unknown_default(unknown_default: FaultKind) -> Self {
        Self { unknown_default }
    }

    /// Classifies a fault. No side effects.
    pub fn classify(&self, fault: &Fault) -> FaultKind {
        match fault {
            Fault::ConnectionReset(_) | Fault::DnsFailure(_) => FaultKind::Transient,
            Fault::UpstreamStatus { status, .. } if *status >= 500 => FaultKind::Transient,
            Fault::UpstreamStatus { .. } => FaultKind::Permanent,
            Fault::DeadlineExceeded(_) => FaultKind::Timeout,
            Fault::ResourceExhausted { .. } => FaultKind::ResourceExhaustion,
            Fault::NotFound(_) | Fault::Forbidden(_) | Fault::InvalidArgument { .. } => {
                FaultKind::Permanent
            }
            Fault::Partial { .. } => FaultKind::PartialFailure,
            Fault::Other(_) => self.unknown_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = ErrorClassifier::default();
        let fault = Fault::connection_reset("peer closed");

        let first = classifier.classify(&fault);
        let second = classifier.classify(&fault);
        assert_eq!(first, second);
        assert_eq!(first, FaultKind::Transient);
    }

    #[test]
    fn test_network_faults_are_transient() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&Fault::dns_failure("api.example.com")),
            FaultKind::Transient
        );
        assert_eq!(
            classifier.classify(&Fault::upstream_status(503, "unavailable")),
            FaultKind::Transient
        );
    }

    #[test]
    fn test_client_faults_are_permanent() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&Fault::not_found("row 42")),
            FaultKind::Permanent
        );
        assert_eq!(
            classifier.classify(&Fault::forbidden("no access")),
            FaultKind::Permanent
        );
        assert_eq!(
            classifier.classify(&Fault::invalid_argument("limit", "must be positive")),
            FaultKind::Permanent
        );
        assert_eq!(
            classifier.classify(&Fault::upstream_status(404, "missing")),
            FaultKind::Permanent
        );
    }

    #[test]
    fn test_timeout_and_exhaustion() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&Fault::deadline_exceeded("5s elapsed")),
            FaultKind::Timeout
        );
        assert_eq!(
            classifier.classify(&Fault::resource_exhausted("connections", "pool drained")),
            FaultKind::ResourceExhaustion
        );
    }

    #[test]
    fn test_partial_failure() {
        let classifier = ErrorClassifier::default();
        let fault = Fault::Partial {
            succeeded: vec![serde_json::json!("a")],
            failed: vec![serde_json::json!("b")],
        };
        assert_eq!(classifier.classify(&fault), FaultKind::PartialFailure);
    }

    #[test]
    fn test_unknown_default_is_configurable() {
        let fault = Fault::other("something odd");

        let default = ErrorClassifier::default();
        assert_eq!(default.classify(&fault), FaultKind::Transient);

        let strict = ErrorClassifier::with_unknown_default(FaultKind::Permanent);
        assert_eq!(strict.classify(&fault), FaultKind::Permanent);
    }
}
