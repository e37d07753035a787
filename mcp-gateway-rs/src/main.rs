use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_gateway::auth::{AuthValidator, JwtValidator, StaticTokenValidator};
use mcp_gateway::registry::{handler_fn, ToolRegistry, ToolSpec};
use mcp_gateway::{build_router, GatewayConfig, GatewayState, ToolDispatcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    config.validate()?;

    let auth: Arc<dyn AuthValidator> = match &config.jwt_secret {
        Some(secret) => Arc::new(JwtValidator::new(secret.as_bytes())),
        None => Arc::new(StaticTokenValidator::new()),
    };

    let registry = builtin_tools()?;
    info!(tools = registry.len(), "Tool registry initialized");

    let state = Arc::new(GatewayState {
        dispatcher: ToolDispatcher::new(&config, registry, auth),
    });
    let app = build_router(state, config.max_payload_bytes);

    info!(
        addr = %config.bind_addr,
        auth_enabled = config.auth_enabled,
        "MCP gateway listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Tools every deployment ships with. Real deployments register their own
/// handlers alongside these before building the dispatcher.
fn builtin_tools() -> Result<ToolRegistry, Box<dyn std::error::Error>> {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec {
            name: "echo".to_string(),
            description: "Returns the provided message unchanged".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                },
                "required": ["message"]
            }),
            idempotent: true,
            required_scope: None,
        },
        handler_fn(|args| async move {
            Ok(args.get("message").cloned().unwrap_or(Value::Null))
        }),
    )?;

    registry.register(
        ToolSpec {
            name: "current_time".to_string(),
            description: "Returns the current UTC time in RFC 3339 format".to_string(),
            input_schema: json!({"type": "object"}),
            idempotent: true,
            required_scope: None,
        },
        handler_fn(|_| async move { Ok(json!(chrono::Utc::now().to_rfc3339())) }),
    )?;

    Ok(registry)
}
