//! Gateway configuration.
//!
//! Every recognized option is an explicit, typed field with a documented
//! default. Configuration is read from `MCP_GATEWAY_*` environment
//! variables once at startup and validated before the server binds.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mcp_resilience_rs::{CircuitBreakerConfig, RetryConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds
    pub bind_addr: SocketAddr,
    /// Whether bearer-token validation runs at all
    pub auth_enabled: bool,
    /// HS256 secret for JWT validation; required when auth is enabled
    pub jwt_secret: Option<String>,
    /// Sustained admission rate per caller
    pub rate_limit_requests_per_minute: f64,
    /// Token-bucket capacity (burst size) per caller
    pub rate_limit_burst_size: u32,
    /// Upper bound on tracked caller buckets before LRU eviction
    pub rate_limit_max_buckets: usize,
    /// Consecutive failures before an upstream's circuit trips
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before admitting a trial
    pub recovery_timeout_seconds: f64,
    /// Retries after the initial handler attempt
    pub max_retries: u32,
    /// Base backoff delay in seconds
    pub base_delay_seconds: f64,
    /// Backoff multiplier per attempt
    pub backoff_factor: f64,
    /// Cap on a single backoff delay in seconds
    pub max_delay_seconds: f64,
    /// Whether backoff delays are jittered
    pub jitter: bool,
    /// Overall deadline for one invocation, covering retries and backoff
    pub request_timeout_seconds: f64,
    /// Maximum accepted request body size in bytes
    pub max_payload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            auth_enabled: false,
            jwt_secret: None,
            rate_limit_requests_per_minute: 60.0,
            rate_limit_burst_size: 10,
            rate_limit_max_buckets: 10_000,
            failure_threshold: 5,
            recovery_timeout_seconds: 30.0,
            max_retries: 3,
            base_delay_seconds: 1.0,
            backoff_factor: 2.0,
            max_delay_seconds: 30.0,
            jitter: true,
            request_timeout_seconds: 60.0,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

/// Parse an environment variable with a typed fallback, warning on garbage
/// instead of failing startup.
fn env_parse<T: FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("Invalid value in {}, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}

impl GatewayConfig {
    /// Loads configuration from `MCP_GATEWAY_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("MCP_GATEWAY_BIND_ADDR", defaults.bind_addr),
            auth_enabled: env_parse("MCP_GATEWAY_AUTH_ENABLED", defaults.auth_enabled),
            jwt_secret: env::var("MCP_GATEWAY_JWT_SECRET").ok(),
            rate_limit_requests_per_minute: env_parse(
                "MCP_GATEWAY_RATE_LIMIT_RPM",
                defaults.rate_limit_requests_per_minute,
            ),
            rate_limit_burst_size: env_parse(
                "MCP_GATEWAY_RATE_LIMIT_BURST",
                defaults.rate_limit_burst_size,
            ),
            rate_limit_max_buckets: env_parse(
                "MCP_GATEWAY_RATE_LIMIT_MAX_BUCKETS",
                defaults.rate_limit_max_buckets,
            ),
            failure_threshold: env_parse(
                "MCP_GATEWAY_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            ),
            recovery_timeout_seconds: env_parse(
                "MCP_GATEWAY_RECOVERY_TIMEOUT_SECONDS",
                defaults.recovery_timeout_seconds,
            ),
            max_retries: env_parse("MCP_GATEWAY_MAX_RETRIES", defaults.max_retries),
            base_delay_seconds: env_parse(
                "MCP_GATEWAY_BASE_DELAY_SECONDS",
                defaults.base_delay_seconds,
            ),
            backoff_factor: env_parse("MCP_GATEWAY_BACKOFF_FACTOR", defaults.backoff_factor),
            max_delay_seconds: env_parse(
                "MCP_GATEWAY_MAX_DELAY_SECONDS",
                defaults.max_delay_seconds,
            ),
            jitter: env_parse("MCP_GATEWAY_JITTER", defaults.jitter),
            request_timeout_seconds: env_parse(
                "MCP_GATEWAY_REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            max_payload_bytes: env_parse(
                "MCP_GATEWAY_MAX_PAYLOAD_BYTES",
                defaults.max_payload_bytes,
            ),
        }
    }

    /// Validates cross-field constraints once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_requests_per_minute <= 0.0 {
            return Err(ConfigError::Invalid(
                "rate_limit_requests_per_minute must be positive".to_string(),
            ));
        }
        if self.rate_limit_burst_size == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_burst_size must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_max_buckets == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit_max_buckets must be at least 1".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.base_delay_seconds < 0.0
            || self.max_delay_seconds < self.base_delay_seconds
        {
            return Err(ConfigError::Invalid(
                "max_delay_seconds must be >= base_delay_seconds >= 0".to_string(),
            ));
        }
        if self.request_timeout_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.auth_enabled && self.jwt_secret.is_none() {
            return Err(ConfigError::Invalid(
                "jwt_secret is required when auth is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Sustained refill rate per second derived from the per-minute setting.
    pub fn refill_rate_per_second(&self) -> f64 {
        self.rate_limit_requests_per_minute / 60.0
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_seconds)
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs_f64(self.recovery_timeout_seconds),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs_f64(self.base_delay_seconds),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_secs_f64(self.max_delay_seconds),
            jitter: self.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit_burst_size, 10);
        assert!((config.refill_rate_per_second() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_auth_requires_secret() {
        let config = GatewayConfig {
            auth_enabled: true,
            jwt_secret: None,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            auth_enabled: true,
            jwt_secret: Some("shhh".to_string()),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let config = GatewayConfig {
            base_delay_seconds: 10.0,
            max_delay_seconds: 1.0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
