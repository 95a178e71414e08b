//! Ollama model adapter.
//!
//! Proxies chat requests to a local Ollama instance via `/api/chat`. Models
//! whose families support native tool calling get the tool definitions
//! passed through; for the rest, a prompt prologue describes a strict JSON
//! reply grammar and the assistant's text is parsed back into tool calls.

use async_trait::async_trait;
use domekit_core::adapter::ModelAdapter;
use domekit_core::error::AdapterError;
use domekit_core::message::{Message, Role, ToolCall};
use domekit_core::tool::ToolDefinition;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Model families known to lack native tool calling in Ollama.
const NO_NATIVE_TOOLS: [&str; 3] = ["gemma", "gemma2", "gemma3"];

/// Extract the family from a model name, e.g. `"gemma3:12b"` → `"gemma3"`.
fn model_family(model: &str) -> &str {
    let head = model.split(':').next().unwrap_or(model);
    head.rsplit('/').next().unwrap_or(head)
}

/// Does this model need the prompt-based tool-calling fallback?
pub fn needs_prompt_tools(model: &str) -> bool {
    NO_NATIVE_TOOLS.contains(&model_family(model))
}

/// Build the system-prompt section describing the available tools and the
/// reply grammar the model must use to call one.
fn build_tool_prompt(tools: &[ToolDefinition]) -> String {
    let mut lines = vec![
        "\n\n## Tool Calling".to_string(),
        "You have access to the following tools. To call a tool, respond with a JSON block:"
            .to_string(),
        "```json\n{\"tool_call\": {\"name\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}}\n```"
            .to_string(),
        "You may include explanation text before or after the JSON block.".to_string(),
        "Available tools:\n".to_string(),
    ];
    for tool in tools {
        lines.push(format!("- **{}**: {}", tool.name, tool.description));
        let props = tool.input_schema.get("properties").and_then(|p| p.as_object());
        let required: Vec<&str> = tool
            .input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if let Some(props) = props {
            let mut param_lines = Vec::new();
            for (name, def) in props {
                let kind = def.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                let desc = def.get("description").and_then(|d| d.as_str()).unwrap_or("");
                let req = if required.contains(&name.as_str()) {
                    " (required)"
                } else {
                    ""
                };
                param_lines.push(format!("    - {name}: {kind} — {desc}{req}"));
            }
            if !param_lines.is_empty() {
                lines.push(param_lines.join("\n"));
            }
        }
    }
    lines.join("\n")
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex"))
}

fn bare_tool_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)\{"tool_call"\s*:\s*\{.*?\}\s*\}"#).expect("static regex"))
}

fn tool_call_from_value(value: &serde_json::Value) -> Option<ToolCall> {
    let tc = value.get("tool_call")?.as_object()?;
    let name = tc.get("name")?.as_str()?;
    let arguments = match tc.get("arguments") {
        Some(args) if args.is_object() => args.to_string(),
        Some(args) => args.to_string(),
        None => "{}".to_string(),
    };
    Some(ToolCall::new("call_0", name, arguments))
}

/// Try to extract a `{"tool_call": …}` from assistant text.
///
/// Returns the call plus any explanation text that preceded it.
pub fn extract_tool_call(content: &str) -> Option<(ToolCall, Option<String>)> {
    if content.is_empty() {
        return None;
    }

    if let Some(caps) = fenced_json_re().captures(content) {
        if let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(inner.as_str()) {
                if let Some(call) = tool_call_from_value(&parsed) {
                    let head = content[..whole.start()].trim();
                    let remaining = (!head.is_empty()).then(|| head.to_string());
                    return Some((call, remaining));
                }
            }
        }
    }

    if let Some(m) = bare_tool_call_re().find(content) {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(m.as_str()) {
            if let Some(call) = tool_call_from_value(&parsed) {
                let head = content[..m.start()].trim();
                let remaining = (!head.is_empty()).then(|| head.to_string());
                return Some((call, remaining));
            }
        }
    }

    // Some models reply with a bare {"name": …, "arguments": …} object.
    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(name) = parsed.get("name").and_then(|n| n.as_str()) {
                let args = parsed
                    .get("arguments")
                    .or_else(|| parsed.get("parameters"))
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                let has_args = args.as_object().map(|o| !o.is_empty()).unwrap_or(false);
                if has_args {
                    return Some((ToolCall::new("call_0", name, args.to_string()), None));
                }
            }
        }
    }

    None
}

// ── Wire shapes ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    message: Option<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiTagsResponse {
    #[serde(default)]
    models: Vec<ApiTagModel>,
}

#[derive(Deserialize)]
struct ApiTagModel {
    #[serde(default)]
    name: String,
}

// ── Adapter ────────────────────────────────────────────────────────────

/// Async adapter for the Ollama `/api/chat` endpoint.
pub struct OllamaAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Convert DomeKit messages to the Ollama wire shape.
    ///
    /// When `prompt_tools` is set (the model lacks native tool support),
    /// tool traffic is folded into plain text so the model still sees the
    /// full exchange: assistant tool calls become fenced JSON, tool results
    /// become user messages.
    fn build_messages(messages: &[Message], prompt_tools: bool) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            if prompt_tools {
                match msg.role {
                    Role::Tool => {
                        out.push(serde_json::json!({
                            "role": "user",
                            "content": format!("Tool result: {}", msg.text()),
                        }));
                    }
                    Role::Assistant if !msg.tool_calls.is_empty() => {
                        let tc = &msg.tool_calls[0];
                        let args: serde_json::Value =
                            serde_json::from_str(&tc.function.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}));
                        let call_json = serde_json::json!({
                            "tool_call": {"name": tc.function.name, "arguments": args}
                        });
                        let text = msg.text();
                        out.push(serde_json::json!({
                            "role": "assistant",
                            "content": format!("{text}\n```json\n{call_json}\n```").trim(),
                        }));
                    }
                    _ => {
                        out.push(serde_json::json!({
                            "role": role_str(msg.role),
                            "content": msg.text(),
                        }));
                    }
                }
            } else {
                let mut m = serde_json::json!({
                    "role": role_str(msg.role),
                });
                if let Some(content) = &msg.content {
                    m["content"] = serde_json::json!(content);
                }
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            let args: serde_json::Value =
                                serde_json::from_str(&tc.function.arguments)
                                    .unwrap_or_else(|_| serde_json::json!({}));
                            serde_json::json!({
                                "function": {"name": tc.function.name, "arguments": args}
                            })
                        })
                        .collect();
                    m["tool_calls"] = serde_json::json!(calls);
                }
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = serde_json::json!(id);
                }
                out.push(m);
            }
        }
        out
    }

    fn parse_response(data: ApiChatResponse) -> Message {
        let api_msg = data.message.unwrap_or(ApiMessage {
            content: None,
            tool_calls: Vec::new(),
        });

        let tool_calls: Vec<ToolCall> = api_msg
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| {
                let arguments = if tc.function.arguments.is_string() {
                    tc.function
                        .arguments
                        .as_str()
                        .unwrap_or("{}")
                        .to_string()
                } else {
                    tc.function.arguments.to_string()
                };
                ToolCall::new(
                    tc.id.unwrap_or_else(|| format!("call_{i}")),
                    tc.function.name,
                    arguments,
                )
            })
            .collect();

        let mut content = api_msg.content.filter(|c| !c.is_empty());

        // Some models return a tool call as JSON text even in native mode.
        if tool_calls.is_empty() {
            if let Some(text) = content.clone() {
                if text.trim_start().starts_with('{') {
                    if let Some((call, remaining)) = extract_tool_call(&text) {
                        return Message::assistant_tool_calls(remaining, vec![call]);
                    }
                }
                content = Some(text);
            }
        }

        Message {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<Message, AdapterError> {
        let prompt_tools = !tools.is_empty() && needs_prompt_tools(model);
        let native_tools = !tools.is_empty() && !prompt_tools;

        let mut api_messages = Self::build_messages(messages, prompt_tools);

        if prompt_tools {
            let prologue = build_tool_prompt(tools);
            let injected = api_messages.iter_mut().find(|m| m["role"] == "system");
            match injected {
                Some(system) => {
                    let existing = system["content"].as_str().unwrap_or("").to_string();
                    system["content"] = serde_json::json!(format!("{existing}{prologue}"));
                }
                None => {
                    api_messages.insert(
                        0,
                        serde_json::json!({"role": "system", "content": prologue}),
                    );
                }
            }
        }

        let mut payload = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": false,
        });
        if native_tools {
            let defs: Vec<serde_json::Value> = tools.iter().map(|t| t.to_openai()).collect();
            payload["tools"] = serde_json::json!(defs);
        }

        debug!(model, prompt_tools, "sending chat request to ollama");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(e.to_string())
                } else {
                    AdapterError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(AdapterError::ModelNotFound(model.to_string()));
        }
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "ollama returned an error");
            return Err(AdapterError::ApiError {
                status_code: status,
                message: body,
            });
        }

        let data: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        let mut result = Self::parse_response(data);

        // For prompt-tools models, mine the text for the reply grammar.
        if prompt_tools && result.tool_calls.is_empty() {
            if let Some(text) = result.content.clone() {
                if let Some((call, remaining)) = extract_tool_call(&text) {
                    result = Message::assistant_tool_calls(remaining, vec![call]);
                }
            }
        }

        Ok(result)
    }

    async fn list_models(&self) -> Result<Vec<String>, AdapterError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        let data: ApiTagsResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;
        Ok(data.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }
}
