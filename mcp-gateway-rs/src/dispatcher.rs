//! Invocation pipeline.
//!
//! One strictly ordered pass per invocation:
//! rate limit -> auth -> handler lookup -> argument validation ->
//! retried handler execution under a deadline -> trace metadata.
//! Only the handler call is ever retried; the admission steps run once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info};

use mcp_resilience_rs::{CircuitBreakerRegistry, ErrorClassifier, RetryExecutor};
use mcp_types_rs::{ErrorCode, ExecutionError, Invocation, ToolResult};

use crate::auth::AuthValidator;
use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use crate::registry::ToolRegistry;

/// Orchestrates the invocation pipeline. Constructed once at startup with
/// its collaborators injected; shared behind an `Arc` by the HTTP layer.
pub struct ToolDispatcher {
    auth_enabled: bool,
    request_timeout: Duration,
    rate_limiter: RateLimiter,
    auth: Arc<dyn AuthValidator>,
    registry: ToolRegistry,
    retry: RetryExecutor,
}

impl ToolDispatcher {
    pub fn new(
        config: &GatewayConfig,
        registry: ToolRegistry,
        auth: Arc<dyn AuthValidator>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker_config()));
        let retry = RetryExecutor::new(
            config.retry_config(),
            ErrorClassifier::default(),
            breakers,
        );
        let rate_limiter = RateLimiter::new(
            config.rate_limit_burst_size,
            config.refill_rate_per_second(),
            config.rate_limit_max_buckets,
        );

        Self {
            auth_enabled: config.auth_enabled,
            request_timeout: config.request_timeout(),
            rate_limiter,
            auth,
            registry,
            retry,
        }
    }

    /// The breaker registry behind this dispatcher's retry executor.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        self.retry.breakers()
    }

    /// Runs one invocation through the pipeline. Always completes with a
    /// `ToolResult`; the wire layer decides which error codes are
    /// protocol-level.
    pub async fn handle(&self, invocation: Invocation, bearer_token: Option<&str>) -> ToolResult {
        let correlation_id = invocation.correlation_id.clone();
        debug!(
            correlation_id = %correlation_id,
            tool = %invocation.tool_name,
            caller = %invocation.caller_identity,
            "Invocation received"
        );

        let result = self.run_pipeline(&invocation, bearer_token).await;
        let result = result.with_trace(&correlation_id, Utc::now());

        if let Some(err) = result.error() {
            info!(
                correlation_id = %correlation_id,
                tool = %invocation.tool_name,
                code = %err.code,
                "Invocation completed with error"
            );
        }
        result
    }

    async fn run_pipeline(
        &self,
        invocation: &Invocation,
        bearer_token: Option<&str>,
    ) -> ToolResult {
        // Step 1: admission. A consumed token is not refunded on later
        // failure or cancellation, to discourage cancel-and-retry abuse.
        if let Err(rejected) = self.rate_limiter.try_acquire(&invocation.caller_identity, 1.0) {
            return ToolResult::Error(
                ExecutionError::new(
                    ErrorCode::RateLimited,
                    "rate limit exceeded for caller",
                )
                .retryable(true)
                .detail("retry_after_seconds", rejected.retry_after_seconds),
            );
        }

        // Step 2: authentication. Protocol-level; never retried.
        let claims = if self.auth_enabled {
            let token = match bearer_token {
                Some(token) => token,
                None => {
                    return ToolResult::Error(ExecutionError::new(
                        ErrorCode::Unauthorized,
                        "missing bearer token",
                    ));
                }
            };
            match self.auth.validate(token).await {
                Ok(claims) => Some(claims),
                Err(err) => {
                    let code = if err.is_forbidden() {
                        ErrorCode::Forbidden
                    } else {
                        ErrorCode::Unauthorized
                    };
                    return ToolResult::Error(ExecutionError::new(code, err.to_string()));
                }
            }
        } else {
            None
        };

        // Step 3: handler lookup.
        let tool = match self.registry.get(&invocation.tool_name) {
            Some(tool) => tool,
            None => {
                return ToolResult::Error(
                    ExecutionError::new(
                        ErrorCode::NotFound,
                        format!("no tool registered under `{}`", invocation.tool_name),
                    )
                    .detail("tool", invocation.tool_name.clone()),
                );
            }
        };

        // Scope enforcement needs the resolved tool; still FORBIDDEN,
        // still protocol-level.
        if let Some(scope) = &tool.spec().required_scope {
            let authorized = claims
                .as_ref()
                .map(|claims| claims.has_scope(scope))
                .unwrap_or(!self.auth_enabled);
            if !authorized {
                return ToolResult::Error(
                    ExecutionError::new(
                        ErrorCode::Forbidden,
                        format!("missing required scope `{}`", scope),
                    )
                    .detail("required_scope", scope.clone()),
                );
            }
        }

        // Step 4: argument validation. Surfaced as a tool-execution error
        // with field detail so the calling agent can self-correct; never a
        // protocol fault.
        if let Err(field_errors) = tool.validate_arguments(&invocation.arguments) {
            return ToolResult::Error(
                ExecutionError::new(
                    ErrorCode::InvalidInput,
                    format!("arguments failed validation for `{}`", invocation.tool_name),
                )
                .detail("field_errors", field_errors),
            );
        }

        // Step 5: the only retried step. The deadline covers every attempt
        // and backoff sleep; expiry cancels whatever is in flight.
        let handler = tool.handler();
        let arguments = invocation.arguments.clone();
        let idempotent = tool.spec().idempotent;
        let upstream_id = invocation.tool_name.as_str();

        let execution = self.retry.execute(upstream_id, idempotent, move || {
            let handler = Arc::clone(&handler);
            let arguments = arguments.clone();
            async move { handler.call(arguments).await }
        });

        match timeout(self.request_timeout, execution).await {
            Ok(Ok(data)) => ToolResult::success(data),
            Ok(Err(err)) => ToolResult::Error(err),
            Err(_) => ToolResult::Error(
                ExecutionError::new(
                    ErrorCode::Timeout,
                    format!(
                        "invocation of `{}` exceeded the {:.1}s deadline",
                        invocation.tool_name,
                        self.request_timeout.as_secs_f64()
                    ),
                )
                .detail("timeout_seconds", self.request_timeout.as_secs_f64()),
            ),
        }
    }

    /// Registered tool specs, for discovery.
    pub fn list_tools(&self) -> Vec<&crate::registry::ToolSpec> {
        self.registry.list()
    }
}
