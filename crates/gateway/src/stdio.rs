//! Stdio transport — a line-framed JSON-RPC surface over the tool registry.
//!
//! External multi-agent hosts drive the same tool schemas through the same
//! policy and audit pipeline as the HTTP router; audit entries carry
//! `transport = "mcp"`. A policy block is a normal reply whose text is the
//! human-readable denial, never a JSON-RPC error.

use crate::SharedState;
use domekit_core::audit::{AuditEntry, AuditEvent};
use domekit_core::policy::{PolicyCheck, VectorOp};
use domekit_core::tool::{ToolContext, ToolLimits};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// The stdio tool server. One instance per process; state is shared with
/// the HTTP gateway when both transports run.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Handle one JSON-RPC request.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                request.id,
                serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {
                        "name": "domekit",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {"tools": {}},
                }),
            ),
            "tools/list" => {
                let tools: Vec<serde_json::Value> = self
                    .state
                    .registry
                    .definitions()
                    .into_iter()
                    .map(|def| {
                        serde_json::json!({
                            "name": def.name,
                            "description": def.description,
                            "inputSchema": def.input_schema,
                        })
                    })
                    .collect();
                JsonRpcResponse::ok(request.id, serde_json::json!({"tools": tools}))
            }
            "tools/call" => {
                let name = request.params.get("name").and_then(|n| n.as_str());
                let Some(name) = name else {
                    return JsonRpcResponse::err(
                        request.id,
                        INVALID_PARAMS,
                        "missing tool name",
                    );
                };
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));

                let text = self.run_tool(name, arguments).await;
                JsonRpcResponse::ok(
                    request.id,
                    serde_json::json!({
                        "content": [{"type": "text", "text": text}],
                    }),
                )
            }
            other => JsonRpcResponse::err(
                request.id,
                METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            ),
        }
    }

    /// Policy-check, execute, and audit-log a single tool call.
    ///
    /// Returns a JSON string with the result, or a human-readable denial.
    async fn run_tool(&self, tool_name: &str, args: serde_json::Value) -> String {
        let manifest = self.state.manifest().await;
        let policy = self.state.policy().await;
        let request_id = Uuid::new_v4().to_string();
        let call_id = Uuid::new_v4().to_string();
        let policy_mode = manifest.runtime.policy_mode.as_str().to_string();

        let entry = |event: AuditEvent| {
            AuditEntry::new(&request_id, event)
                .with_app(&manifest.app.name)
                .with_policy_mode(&policy_mode)
        };

        // Tool allow-list plus the same argument sub-checks the router runs.
        let mut decision = policy.check_tool(tool_name);
        if decision.is_allow() {
            let arg = |key: &str| args.get(key).and_then(|v| v.as_str());
            let sub = match tool_name {
                "sql_query" => arg("db_path").map(|p| policy.check_sqlite(p)),
                "read_file" => arg("path").map(|p| policy.check_read(p)),
                "write_file" => arg("path").map(|p| policy.check_write(p)),
                "vector_search" => arg("collection").map(|c| policy.check_vector(c, VectorOp::Read)),
                "vector_manage" => {
                    arg("collection").map(|c| policy.check_vector(c, VectorOp::Write))
                }
                _ => None,
            };
            if let Some(sub) = sub {
                decision = sub;
            }
        }

        if !decision.is_allow() {
            let mut detail = serde_json::Map::new();
            detail.insert("tool".into(), serde_json::json!(tool_name));
            detail.insert("rule".into(), serde_json::json!(decision.rule));
            detail.insert("reason".into(), serde_json::json!(decision.reason));
            detail.insert("transport".into(), serde_json::json!("mcp"));
            let _ = self
                .state
                .audit
                .append(&entry(AuditEvent::PolicyBlock).with_detail(detail));
            return format!("Policy denied: {}", decision.reason);
        }

        let mut call_detail = serde_json::Map::new();
        call_detail.insert("tool".into(), serde_json::json!(tool_name));
        call_detail.insert("call_id".into(), serde_json::json!(call_id));
        call_detail.insert("arguments".into(), args.clone());
        call_detail.insert("transport".into(), serde_json::json!("mcp"));
        let _ = self
            .state
            .audit
            .append(&entry(AuditEvent::ToolCall).with_detail(call_detail));

        let limits = manifest.tool_limits();
        let ctx = ToolContext {
            request_id: request_id.clone(),
            app_name: manifest.app.name.clone(),
            policy_mode: policy_mode.clone(),
            policy: policy.clone() as std::sync::Arc<dyn PolicyCheck>,
            limits: ToolLimits {
                max_rows: limits.max_rows,
                max_bytes: limits.max_bytes,
                default_top_k: limits.default_top_k,
            },
        };

        let (text, success) = match self.state.registry.get(tool_name) {
            None => (
                serde_json::json!({"error": format!("Unknown tool: {tool_name}")}).to_string(),
                false,
            ),
            Some(tool) => match tool.run(&ctx, args).await {
                Ok(output) if output.success => (
                    serde_json::json!({"result": output.result, "success": true}).to_string(),
                    true,
                ),
                Ok(output) => (
                    serde_json::json!({
                        "error": output.error.unwrap_or_else(|| "tool failed".into()),
                        "success": false
                    })
                    .to_string(),
                    false,
                ),
                Err(err) => (
                    serde_json::json!({"error": err.to_string(), "success": false}).to_string(),
                    false,
                ),
            },
        };

        let mut result_detail = serde_json::Map::new();
        result_detail.insert("tool".into(), serde_json::json!(tool_name));
        result_detail.insert("call_id".into(), serde_json::json!(call_id));
        result_detail.insert("success".into(), serde_json::json!(success));
        result_detail.insert("transport".into(), serde_json::json!("mcp"));
        let _ = self
            .state
            .audit
            .append(&entry(AuditEvent::ToolResult).with_detail(result_detail));

        text
    }

    /// Serve line-framed JSON-RPC over stdin/stdout until EOF.
    pub async fn serve(&self) -> std::io::Result<()> {
        info!("stdio transport ready");
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(frame = line.len(), "stdio request");

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle(request).await,
                Err(err) => JsonRpcResponse::err(
                    serde_json::Value::Null,
                    PARSE_ERROR,
                    format!("parse error: {err}"),
                ),
            };

            let mut payload = serde_json::to_vec(&response)?;
            payload.push(b'\n');
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayState;
    use async_trait::async_trait;
    use domekit_audit::AuditLog;
    use domekit_core::adapter::ModelAdapter;
    use domekit_core::error::AdapterError;
    use domekit_core::message::Message;
    use domekit_core::tool::ToolDefinition;
    use domekit_manifest::Manifest;
    use std::sync::Arc;

    struct NullAdapter;

    #[async_trait]
    impl ModelAdapter for NullAdapter {
        fn name(&self) -> &str {
            "null"
        }
        async fn chat(
            &self,
            _: &[Message],
            _: &[ToolDefinition],
            _: &str,
        ) -> Result<Message, AdapterError> {
            Ok(Message::assistant("unused"))
        }
    }

    fn server(manifest_yaml: &str) -> (McpServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(Manifest::parse(manifest_yaml).unwrap());
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let registry = Arc::new(domekit_tools::default_registry(None, None));
        let state = GatewayState::new(manifest, audit, registry, Arc::new(NullAdapter)).unwrap();
        (McpServer::new(state), dir)
    }

    fn rpc(method: &str, params: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.into(),
            id: serde_json::json!(1),
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let (server, _dir) = server("app:\n  name: mcp-app\n");
        let response = server.handle(rpc("initialize", serde_json::json!({}))).await;
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "domekit");
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn tools_list_exposes_registry() {
        let (server, _dir) = server("app:\n  name: mcp-app\n");
        let response = server.handle(rpc("tools/list", serde_json::json!({}))).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 5);
        assert!(tools.iter().any(|t| t["name"] == "sql_query"));
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn blocked_call_is_text_not_error() {
        let (server, dir) = server("app:\n  name: mcp-app\n");
        let response = server
            .handle(rpc(
                "tools/call",
                serde_json::json!({"name": "read_file", "arguments": {"path": "/etc/shadow"}}),
            ))
            .await;

        assert!(response.error.is_none(), "policy block must not be an rpc error");
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.starts_with("Policy denied:"));

        // The block is audited with transport=mcp
        let entries =
            domekit_audit::read_all(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, domekit_core::audit::AuditEvent::PolicyBlock);
        assert_eq!(entries[0].detail_str("transport"), "mcp");
    }

    #[tokio::test]
    async fn allowed_call_executes_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hello.txt");
        std::fs::write(&target, "hi from mcp").unwrap();

        let yaml = format!(
            "app:\n  name: mcp-app\npolicy:\n  tools:\n    allow: [read_file]\n  data:\n    filesystem:\n      allow_read: [\"{}\"]\n",
            dir.path().display()
        );
        let (server, audit_dir) = server(&yaml);

        let response = server
            .handle(rpc(
                "tools/call",
                serde_json::json!({"name": "read_file", "arguments": {"path": target.to_str().unwrap()}}),
            ))
            .await;

        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("hi from mcp"));

        let entries =
            domekit_audit::read_all(audit_dir.path().join("audit.jsonl")).unwrap();
        let events: Vec<_> = entries.iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                domekit_core::audit::AuditEvent::ToolCall,
                domekit_core::audit::AuditEvent::ToolResult,
            ]
        );
        assert!(entries.iter().all(|e| e.detail_str("transport") == "mcp"));
    }

    #[tokio::test]
    async fn unknown_method_is_rpc_error() {
        let (server, _dir) = server("app:\n  name: mcp-app\n");
        let response = server.handle(rpc("tools/destroy", serde_json::json!({}))).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_tool_name_is_invalid_params() {
        let (server, _dir) = server("app:\n  name: mcp-app\n");
        let response = server
            .handle(rpc("tools/call", serde_json::json!({"arguments": {}})))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }
}
