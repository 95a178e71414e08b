//! Tool SDK — the abstraction over the built-in sandboxes.
//!
//! Every DomeKit tool implements the `Tool` trait. The runtime validates
//! arguments, checks policy, executes the tool, and audits the result.
//! Tools are stored in a registry keyed by name — no inheritance hierarchy.

use crate::error::ToolError;
use crate::policy::PolicyCheck;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Function-calling compatible schema for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    /// Description of what the tool does (sent to the model)
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,

    /// Permission tags, e.g. ["data:sqlite"]
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ToolDefinition {
    /// Convert to the OpenAI function-calling wire shape.
    pub fn to_openai(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Resource limits resolved from the manifest's per-tool config.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    /// Row cap for sql_query results
    pub max_rows: usize,
    /// Byte cap for read_file / write_file
    pub max_bytes: u64,
    /// Default and upper bound for vector_search top_k
    pub default_top_k: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_rows: 100,
            max_bytes: 1_048_576,
            default_top_k: 10,
        }
    }
}

/// Runtime context supplied to every tool invocation.
///
/// Carries the per-request identity plus the policy snapshot the request was
/// admitted under; tools re-check their own resource policy against it.
#[derive(Clone)]
pub struct ToolContext {
    pub request_id: String,
    pub app_name: String,
    pub policy_mode: String,
    pub policy: Arc<dyn PolicyCheck>,
    pub limits: ToolLimits,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Structured result payload
    #[serde(default)]
    pub result: serde_json::Value,

    /// Error message when the tool failed in an expected way
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub success: bool,
}

impl ToolOutput {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result,
            error: None,
            success: true,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            result: serde_json::Value::Null,
            error: Some(error.into()),
            success: false,
        }
    }
}

/// The core Tool trait.
///
/// Each sandbox (sql_query, read_file, write_file, vector_search,
/// vector_manage) implements this trait and enforces its own resource
/// constraints inside `run`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's function-calling schema.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool. Called by the runtime after the policy check.
    async fn run(
        &self,
        ctx: &ToolContext,
        args: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// A registry of available tools, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions, sorted by name for a stable order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyDecision, VectorOp};

    /// A policy stub that allows everything.
    struct AllowAll;

    impl PolicyCheck for AllowAll {
        fn check_tool(&self, _: &str) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
        fn check_sqlite(&self, _: &str) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
        fn check_read(&self, _: &str) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
        fn check_write(&self, _: &str) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
        fn check_network(&self, _: &str) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
        fn check_vector(&self, _: &str, _: VectorOp) -> PolicyDecision {
            PolicyDecision::allow("test", "allow all")
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echoes back the input".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"],
                }),
                permissions: vec![],
            }
        }

        async fn run(
            &self,
            _ctx: &ToolContext,
            args: serde_json::Value,
        ) -> std::result::Result<ToolOutput, ToolError> {
            let text = args["text"].as_str().unwrap_or("").to_string();
            Ok(ToolOutput::ok(serde_json::json!({ "text": text })))
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            request_id: "req-test".into(),
            app_name: "test-app".into(),
            policy_mode: "local_only".into(),
            policy: Arc::new(AllowAll),
            limits: ToolLimits::default(),
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn openai_definition_shape() {
        let def = EchoTool.definition();
        let wire = def.to_openai();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "echo");
        assert!(wire["function"]["parameters"]["properties"]["text"].is_object());
    }

    #[tokio::test]
    async fn run_tool_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let out = tool
            .run(&test_ctx(), serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.result["text"], "hello");
    }
}
