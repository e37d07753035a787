//! Per-upstream circuit breakers.
//!
//! One state machine per `upstream_id`, kept in a process-wide registry that
//! is constructed explicitly at startup and injected where needed.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery, a single trial request allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Configuration for the breakers in a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit trips
    pub failure_threshold: u32,
    /// Time to keep the circuit open before allowing a trial
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-upstream breaker state
#[derive(Debug)]
struct CircuitStats {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    /// When the single half-open trial was handed out, if one is in flight
    trial_started: Option<Instant>,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            trial_started: None,
        }
    }
}

/// Registry of circuit breakers keyed by upstream id.
///
/// All state transitions happen under the registry's write lock, which
/// linearizes concurrent callers racing on the same upstream. In particular,
/// half-open admission is a locked read-modify-write: exactly one caller
/// wins the trial slot, the rest are rejected until it resolves or its
/// slot ages out.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, CircuitStats>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    /// Checks whether a call to the upstream is currently permitted.
    ///
    /// In the Open state, the first check after `recovery_timeout` has
    /// elapsed transitions the circuit to HalfOpen and claims the trial.
    pub fn can_execute(&self, upstream_id: &str) -> bool {
        let mut circuits = self.circuits.write().unwrap();
        let stats = circuits
            .entry(upstream_id.to_string())
            .or_insert_with(CircuitStats::new);

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = stats
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);

                if elapsed > self.config.recovery_timeout {
                    stats.state = CircuitState::HalfOpen;
                    stats.trial_started = Some(Instant::now());

                    info!(
                        circuit = %upstream_id,
                        "Circuit HALF-OPEN: allowing a single trial request"
                    );
                    counter!("circuit_breaker_transitions", 1,
                        "upstream" => upstream_id.to_string(), "to" => "half_open");

                    true
                } else {
                    debug!(
                        circuit = %upstream_id,
                        remaining_ms = %(self.config.recovery_timeout.saturating_sub(elapsed)).as_millis(),
                        "Circuit open, request rejected"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                // One trial at a time; everyone else waits for it to
                // resolve. A trial whose caller was cancelled never reports
                // back, so a slot older than the recovery timeout is
                // reclaimable.
                match stats.trial_started {
                    Some(started) if started.elapsed() <= self.config.recovery_timeout => false,
                    abandoned => {
                        if abandoned.is_some() {
                            warn!(
                                circuit = %upstream_id,
                                "Half-open trial abandoned, reclaiming the slot"
                            );
                            counter!("circuit_breaker_abandoned_trials", 1,
                                "upstream" => upstream_id.to_string());
                        }
                        stats.trial_started = Some(Instant::now());
                        true
                    }
                }
            }
        }
    }

    /// Records a successful call to the upstream.
    pub fn record_success(&self, upstream_id: &str) {
        let mut circuits = self.circuits.write().unwrap();
        let stats = circuits
            .entry(upstream_id.to_string())
            .or_insert_with(CircuitStats::new);

        match stats.state {
            CircuitState::Closed => {
                stats.failure_count = 0;
                stats.success_count += 1;
            }
            CircuitState::HalfOpen => {
                stats.state = CircuitState::Closed;
                stats.failure_count = 0;
                stats.success_count += 1;
                stats.trial_started = None;

                info!(circuit = %upstream_id, "Circuit CLOSED: upstream recovered");
                counter!("circuit_breaker_transitions", 1,
                    "upstream" => upstream_id.to_string(), "to" => "closed");
            }
            CircuitState::Open => {
                debug!(circuit = %upstream_id, "Success recorded while open, ignoring");
            }
        }
    }

    /// Records a failed call to the upstream.
    pub fn record_failure(&self, upstream_id: &str) {
        let mut circuits = self.circuits.write().unwrap();
        let stats = circuits
            .entry(upstream_id.to_string())
            .or_insert_with(CircuitStats::new);

        stats.last_failure = Some(Instant::now());

        match stats.state {
            CircuitState::Closed => {
                stats.failure_count += 1;
                if stats.failure_count >= self.config.failure_threshold {
                    stats.state = CircuitState::Open;

                    warn!(
                        circuit = %upstream_id,
                        failures = %stats.failure_count,
                        threshold = %self.config.failure_threshold,
                        "Circuit OPEN: failure threshold reached"
                    );
                    counter!("circuit_breaker_transitions", 1,
                        "upstream" => upstream_id.to_string(), "to" => "open");
                }
            }
            CircuitState::HalfOpen => {
                // A failed trial reopens the circuit and restarts the clock
                stats.state = CircuitState::Open;
                stats.trial_started = None;

                warn!(circuit = %upstream_id, "Circuit REOPENED: trial request failed");
                counter!("circuit_breaker_transitions", 1,
                    "upstream" => upstream_id.to_string(), "to" => "open");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state of an upstream's circuit. Unknown upstreams read as Closed.
    pub fn state(&self, upstream_id: &str) -> CircuitState {
        let circuits = self.circuits.read().unwrap();
        circuits
            .get(upstream_id)
            .map(|stats| stats.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failure count for an upstream.
    pub fn failure_count(&self, upstream_id: &str) -> u32 {
        let circuits = self.circuits.read().unwrap();
        circuits
            .get(upstream_id)
            .map(|stats| stats.failure_count)
            .unwrap_or(0)
    }

    /// Total successes recorded against an upstream.
    pub fn success_count(&self, upstream_id: &str) -> u64 {
        let circuits = self.circuits.read().unwrap();
        circuits
            .get(upstream_id)
            .map(|stats| stats.success_count)
            .unwrap_or(0)
    }

    /// Time remaining until an open circuit will admit a trial, if open.
    pub fn time_until_retry(&self, upstream_id: &str) -> Option<Duration> {
        let circuits = self.circuits.read().unwrap();
        let stats = circuits.get(upstream_id)?;
        if stats.state != CircuitState::Open {
            return None;
        }
        let elapsed = stats.last_failure.map(|at| at.elapsed())?;
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Manually resets an upstream's circuit to Closed.
    pub fn reset(&self, upstream_id: &str) {
        let mut circuits = self.circuits.write().unwrap();
        if let Some(stats) = circuits.get_mut(upstream_id) {
            let previous = stats.state;
            *stats = CircuitStats::new();
            info!(
                circuit = %upstream_id,
                previous_state = %previous,
                "Circuit manually reset to CLOSED state"
            );
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
