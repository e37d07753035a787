//! Tool registry.
//!
//! Tools are registered explicitly at startup with a name, a JSON Schema
//! for their arguments, an idempotency flag, and an optional required
//! scope. Schemas are compiled once at registration; dispatch is a plain
//! name lookup with no runtime reflection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use mcp_resilience_rs::Fault;

/// A tool's business logic.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, Fault>;
}

/// Declarative description of a tool, supplied at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name, looked up by `tools/call`
    pub name: String,
    /// Human-readable description, surfaced by `tools/list`
    pub description: String,
    /// JSON Schema the arguments must satisfy
    pub input_schema: Value,
    /// Whether the handler is safe to retry blindly
    pub idempotent: bool,
    /// Scope a caller's token must carry, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_scope: Option<String>,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// JSON pointer to the offending field ("" for the whole document)
    pub field: String,
    /// What was wrong with it
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    Duplicate(String),

    #[error("invalid tool name `{0}`: names are non-empty [a-zA-Z0-9_./-]")]
    InvalidName(String),

    #[error("invalid schema for tool `{0}`: {1}")]
    InvalidSchema(String, String),
}

/// A registered tool: its spec, compiled schema, and handler.
pub struct RegisteredTool {
    spec: ToolSpec,
    schema: JSONSchema,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Validates arguments against the tool's compiled schema, collecting
    /// every field-level failure rather than stopping at the first.
    pub fn validate_arguments(&self, arguments: &Map<String, Value>) -> Result<(), Vec<FieldError>> {
        let instance = Value::Object(arguments.clone());
        // Collected into an owned Vec before `instance` drops; the error
        // iterator borrows it
        let result = match self.schema.validate(&instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|err| FieldError {
                    field: err.instance_path.to_string(),
                    message: err.to_string(),
                })
                .collect()),
        };
        result
    }
}

fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'))
}

/// Registry of tools keyed by name. Built once at startup, read-only after.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Duplicate names and uncompilable schemas are
    /// startup errors, not request-time surprises.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if !valid_tool_name(&spec.name) {
            return Err(RegistryError::InvalidName(spec.name));
        }
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }

        let schema = JSONSchema::compile(&spec.input_schema)
            .map_err(|err| RegistryError::InvalidSchema(spec.name.clone(), err.to_string()))?;

        self.tools.insert(
            spec.name.clone(),
            RegisteredTool {
                spec,
                schema,
                handler,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool specs sorted by name, for `tools/list`.
    pub fn list(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<&ToolSpec> = self.tools.values().map(|t| &t.spec).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Adapter turning an async closure into a [`ToolHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Fault>> + Send,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, Fault> {
        (self.0)(arguments).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
