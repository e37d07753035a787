//! JSON-RPC 2.0 wire surface.
//!
//! Two fault channels, deliberately distinct: auth failures and malformed
//! envelopes are protocol-level `error` objects, while rate limiting,
//! validation, and tool-execution failures travel inside `result` with
//! `isError: true` so the calling agent can read the structured code and
//! self-correct. Every response is HTTP 200; the envelope carries the
//! outcome.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use metrics::{counter, histogram};
use serde_json::{json, Map, Value};
use tracing::debug;

use mcp_types_rs::{ErrorCode, ExecutionError, Invocation, ToolResult};

use crate::GatewayState;

// JSON-RPC 2.0 standard codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
// Implementation-defined codes for the protocol-level auth channel
pub const UNAUTHORIZED: i64 = -32001;
pub const FORBIDDEN: i64 = -32003;

fn rpc_error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Maps a finished [`ToolResult`] onto the envelope.
///
/// UNAUTHORIZED and FORBIDDEN are the only codes promoted to protocol
/// errors; everything else is a `result` the agent is expected to handle.
fn tool_result_response(id: Value, result: ToolResult) -> Value {
    match result {
        ToolResult::Success { data, metadata } => {
            let text = match &data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rpc_result(
                id,
                json!({
                    "content": [{"type": "text", "text": text}],
                    "data": data,
                    "metadata": metadata,
                }),
            )
        }
        ToolResult::Error(err) => match err.code {
            ErrorCode::Unauthorized => {
                let data = error_data(&err);
                rpc_error(id, UNAUTHORIZED, err.message, Some(data))
            }
            ErrorCode::Forbidden => {
                let data = error_data(&err);
                rpc_error(id, FORBIDDEN, err.message, Some(data))
            }
            _ => rpc_result(
                id,
                json!({
                    "isError": true,
                    "content": [{"type": "text", "text": err.message}],
                    "code": err.code,
                    "retryable": err.retryable,
                    "details": err.details,
                    "correlation_id": err.correlation_id,
                }),
            ),
        },
    }
}

fn error_data(err: &ExecutionError) -> Value {
    json!({
        "code": err.code,
        "correlation_id": err.correlation_id,
    })
}

/// POST / entry point. Parses the envelope, routes the method, and hands
/// `tools/call` to the dispatcher.
pub async fn handle_rpc(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = std::time::Instant::now();

    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            counter!("rpc_parse_errors", 1);
            return Json(rpc_error(
                Value::Null,
                PARSE_ERROR,
                format!("parse error: {}", err),
                None,
            ))
            .into_response();
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Json(rpc_error(
            id,
            INVALID_REQUEST,
            "invalid request: expected jsonrpc \"2.0\"",
            None,
        ))
        .into_response();
    }

    let method = match request.get("method").and_then(Value::as_str) {
        Some(method) => method,
        None => {
            return Json(rpc_error(
                id,
                INVALID_REQUEST,
                "invalid request: missing method",
                None,
            ))
            .into_response();
        }
    };

    debug!(method = %method, "RPC request received");
    counter!("rpc_requests", 1, "method" => method.to_string());

    let response = match method {
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            handle_tools_call(&state, &headers, id, params).await
        }
        "tools/list" => handle_tools_list(&state, id),
        other => rpc_error(
            id,
            METHOD_NOT_FOUND,
            format!("method not found: {}", other),
            None,
        ),
    };

    histogram!(
        "rpc_request_duration_seconds",
        started.elapsed().as_secs_f64(),
        "method" => method.to_string()
    );
    Json(response).into_response()
}

async fn handle_tools_call(
    state: &GatewayState,
    headers: &HeaderMap,
    id: Value,
    params: Value,
) -> Value {
    let tool_name = match params.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => {
            return rpc_error(
                id,
                INVALID_PARAMS,
                "invalid params: missing tool name",
                None,
            );
        }
    };

    let arguments: Map<String, Value> = match params.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return rpc_error(
                id,
                INVALID_PARAMS,
                "invalid params: arguments must be an object",
                None,
            );
        }
    };

    let token = bearer_token(headers);
    // The caller identity for rate limiting is the bearer credential when
    // present; otherwise all unauthenticated traffic shares one bucket.
    let caller_identity = token.unwrap_or("anonymous").to_string();

    let invocation = Invocation::new(tool_name, arguments, caller_identity);
    let result = state.dispatcher.handle(invocation, token).await;
    tool_result_response(id, result)
}

fn handle_tools_list(state: &GatewayState, id: Value) -> Value {
    let tools: Vec<Value> = state
        .dispatcher
        .list_tools()
        .into_iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "description": spec.description,
                "inputSchema": spec.input_schema,
            })
        })
        .collect();
    rpc_result(id, json!({ "tools": tools }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, StaticTokenValidator};
    use crate::config::GatewayConfig;
    use crate::dispatcher::ToolDispatcher;
    use crate::registry::{handler_fn, ToolRegistry, ToolSpec};

    fn test_state(auth_enabled: bool) -> Arc<GatewayState> {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec {
                    name: "echo".to_string(),
                    description: "Echoes its message back".to_string(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"message": {"type": "string"}},
                        "required": ["message"]
                    }),
                    idempotent: true,
                    required_scope: None,
                },
                handler_fn(|args| async move {
                    Ok(args.get("message").cloned().unwrap_or(Value::Null))
                }),
            )
            .unwrap();

        let config = GatewayConfig {
            auth_enabled,
            jwt_secret: auth_enabled.then(|| "unused-by-static".to_string()),
            rate_limit_requests_per_minute: 6000.0,
            rate_limit_burst_size: 100,
            base_delay_seconds: 0.005,
            max_delay_seconds: 0.05,
            request_timeout_seconds: 1.0,
            ..GatewayConfig::default()
        };
        let auth = StaticTokenValidator::new().with_token(
            "good-token",
            Claims {
                sub: "agent-1".to_string(),
                exp: u64::MAX,
                roles: vec![],
                scopes: vec![],
            },
        );
        Arc::new(GatewayState {
            dispatcher: ToolDispatcher::new(&config, registry, Arc::new(auth)),
        })
    }

    async fn post(state: Arc<GatewayState>, headers: HeaderMap, body: &str) -> Value {
        let response = handle_rpc(
            State(state),
            headers,
            Bytes::copy_from_slice(body.as_bytes()),
        )
        .await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = post(test_state(false), HeaderMap::new(), "{not json").await;
        assert_eq!(response["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_wrong_jsonrpc_version_rejected() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"1.0","id":1,"method":"tools/list"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(response["id"], json!(1));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/purge"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_tools_call_success_envelope() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await;
        assert_eq!(response["id"], json!(3));
        let result = &response["result"];
        assert_eq!(result["content"][0]["type"], json!("text"));
        assert_eq!(result["content"][0]["text"], json!("hi"));
        assert!(result["metadata"]["correlation_id"].is_string());
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_business_error_stays_in_result() {
        // Unknown tool: NOT_FOUND must be a result with isError, never a
        // protocol error object
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"foo"}}"#,
        )
        .await;
        assert!(response.get("error").is_none());
        let result = &response["result"];
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["code"], json!("NOT_FOUND"));
        assert!(result["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn test_validation_error_stays_in_result() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"echo","arguments":{"message":7}}}"#,
        )
        .await;
        let result = &response["result"];
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["code"], json!("INVALID_INPUT"));
        assert!(result["details"]["field_errors"].is_array());
    }

    #[tokio::test]
    async fn test_auth_failure_is_protocol_error() {
        let response = post(
            test_state(true),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(UNAUTHORIZED));
        assert!(response.get("result").is_none());
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer good-token".parse().unwrap());
        let response = post(
            test_state(true),
            headers,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
        )
        .await;
        assert_eq!(response["result"]["content"][0]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_invalid_params() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"arguments":{}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = post(
            test_state(false),
            HeaderMap::new(),
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/list"}"#,
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("echo"));
        assert!(tools[0]["inputSchema"].is_object());
    }
}
