//! Tools the model may call, and the registry that dispatches them
//!
//! The registry is the boundary between the model's loosely-typed requests
//! and local code: it resolves the name, validates the arguments against the
//! tool's [`ToolSchema`], runs the executor under a timeout and turns every
//! failure into a [`ToolCallResult`] the model can read.

mod schema;
mod web_search;

pub use schema::{ArgumentError, ParamType, ParameterSpec, ToolSchema, ValidatedArgs};
pub use web_search::{WebSearchTool, WEB_SEARCH_TOOL_NAME};

use crate::llm::{ContentPart, ToolDefinition};
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Result of executing a tool
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// A call the model asked for
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The answer to one [`ToolCallRequest`], sent back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn for_request(request: &ToolCallRequest, result: ToolResult) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            content: result.output,
            is_error: !result.success,
        }
    }

    pub fn error(request: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self::for_request(request, ToolResult::error(message))
    }

    pub fn to_content_part(&self) -> ContentPart {
        ContentPart::ToolResult {
            tool_use_id: self.id.clone(),
            name: self.name.clone(),
            content: self.content.clone(),
            is_error: self.is_error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments for '{tool}': {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: ArgumentError,
    },
}

/// Trait for agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Parameters the executor accepts
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with arguments already checked against [`Tool::schema`]
    async fn execute(&self, args: ValidatedArgs) -> Result<ToolResult>;

    /// Convert to LLM tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema().to_json_schema(),
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    // Ordered so declarations are stable between requests
    tools: BTreeMap<String, Arc<dyn Tool>>,
    tool_timeout_secs: u64,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            tool_timeout_secs: 30,
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!("Registered tool '{}'", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Set the per-call tool timeout (seconds)
    pub fn set_tool_timeout_secs(&mut self, secs: u64) {
        self.tool_timeout_secs = secs;
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up the executor for `name`
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Resolve, validate and run one call. Never fails: problems become error results.
    pub async fn execute(&self, request: &ToolCallRequest) -> ToolCallResult {
        let tool = match self.resolve(&request.name) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::warn!("Model requested unregistered tool '{}'", request.name);
                return ToolCallResult::error(request, e.to_string());
            }
        };

        let args = match tool
            .schema()
            .validate(&Value::Object(request.arguments.clone()))
        {
            Ok(args) => args,
            Err(source) => {
                let e = ToolError::InvalidArguments {
                    tool: request.name.clone(),
                    source,
                };
                tracing::warn!("{}", e);
                return ToolCallResult::error(request, e.to_string());
            }
        };

        let name = request.name.as_str();
        let timeout_duration = Duration::from_secs(self.tool_timeout_secs);

        // Wrap tool execution with timeout + panic recovery to prevent crashes
        let result = match timeout(
            timeout_duration,
            AssertUnwindSafe(tool.execute(args)).catch_unwind(),
        )
        .await
        {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                tracing::warn!("Tool '{}' failed: {:#}", name, e);
                ToolResult::error(format!("Tool '{}' failed: {:#}", name, e))
            }
            Ok(Err(panic_info)) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!("Tool '{}' panicked: {}", name, panic_msg);
                ToolResult::error(format!("Tool '{}' crashed: {}", name, panic_msg))
            }
            Err(_) => ToolResult::error(format!(
                "Tool '{}' timed out after {} seconds",
                name, self.tool_timeout_secs
            )),
        };

        ToolCallResult::for_request(request, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the text"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new().param(ParameterSpec::required("text", ParamType::String, "Text"))
        }

        async fn execute(&self, args: ValidatedArgs) -> Result<ToolResult> {
            Ok(ToolResult::success(args.str("text").unwrap_or_default()))
        }
    }

    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "sleep tool"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new()
        }

        async fn execute(&self, _args: ValidatedArgs) -> Result<ToolResult> {
            time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("done"))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new()
        }

        async fn execute(&self, _args: ValidatedArgs) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always errors"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new()
        }

        async fn execute(&self, _args: ValidatedArgs) -> Result<ToolResult> {
            anyhow::bail!("disk on fire")
        }
    }

    fn request(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry
    }

    #[test]
    fn test_definitions_match_schema() {
        let defs = registry().definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].parameters["required"], json!(["text"]));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = registry();
        assert!(registry.resolve("echo").is_ok());
        assert!(matches!(
            registry.resolve("nope"),
            Err(ToolError::Unknown(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_execute_success_keeps_id() {
        let result = registry()
            .execute(&request("echo", json!({"text": "hi"})))
            .await;
        assert_eq!(result.id, "call_1");
        assert_eq!(result.name, "echo");
        assert_eq!(result.content, "hi");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_error_result() {
        let result = registry().execute(&request("teleport", json!({}))).await;
        assert!(result.is_error);
        assert_eq!(result.content, "Unknown tool: teleport");
        assert_eq!(result.name, "teleport");
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_arguments() {
        let result = registry().execute(&request("echo", json!({"text": 7}))).await;
        assert!(result.is_error);
        assert!(result.content.contains("must be a string"));

        let result = registry().execute(&request("echo", json!({}))).await;
        assert!(result.is_error);
        assert!(result.content.contains("missing required parameter 'text'"));
    }

    #[tokio::test]
    async fn test_execute_enforces_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool));
        registry.set_tool_timeout_secs(1);

        let result = registry.execute(&request("sleep", json!({}))).await;
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_recovers_from_panic_and_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanicTool));
        registry.register(Arc::new(FailingTool));

        let result = registry.execute(&request("panic", json!({}))).await;
        assert!(result.is_error);
        assert!(result.content.contains("crashed: boom"));

        let result = registry.execute(&request("failing", json!({}))).await;
        assert!(result.is_error);
        assert!(result.content.contains("disk on fire"));
    }
}
