//! Message and chat API domain types.
//!
//! These are the value objects that flow through the entire system:
//! client sends a ChatRequest → router loops with the model → tools run →
//! the client gets a ChatResponse with a Trace attached.
//!
//! The wire shapes are OpenAI-compatible so existing clients work unchanged.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// The function payload of a tool call, as the model emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON-encoded string
    pub arguments: String,
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call ID (echoed back in the tool result message)
    pub id: String,

    /// Always "function" in the OpenAI wire shape
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,

    pub function: ToolCallFunction,
}

fn function_kind() -> String {
    "function".into()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content. Assistant messages that only carry tool calls
    /// may have no content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// The text content, or "" when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// An OpenAI-compatible chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_model")]
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub stream: bool,
}

fn default_model() -> String {
    "default".into()
}

/// Trace metadata attached to every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceMeta {
    pub request_id: String,

    #[serde(default)]
    pub tools_used: Vec<String>,

    #[serde(default)]
    pub tables_queried: Vec<String>,

    #[serde(default)]
    pub policy_mode: String,

    #[serde(default)]
    pub model: String,
}

/// A single completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,

    pub message: Message,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// An OpenAI-compatible chat completion response with a DomeKit trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,

    #[serde(default = "chat_completion_object")]
    pub object: String,

    pub model: String,

    pub choices: Vec<Choice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMeta>,
}

fn chat_completion_object() -> String {
    "chat.completion".into()
}

impl ChatResponse {
    /// The first choice's text content, or "".
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.message.text()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("count rows");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "count rows");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_tool_calls(
            None,
            vec![ToolCall::new("call_0", "sql_query", r#"{"db_path":"/tmp/h.db"}"#)],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.tool_calls[0].kind, "function");
    }

    #[test]
    fn tool_call_wire_shape() {
        let call = ToolCall::new("call_1", "read_file", r#"{"path":"/app/data/a.txt"}"#);
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "read_file");
    }

    #[test]
    fn content_omitted_when_none() {
        let msg = Message::assistant_tool_calls(None, vec![ToolCall::new("c", "t", "{}")]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"content\""));
    }

    #[test]
    fn chat_request_defaults() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(req.model, "default");
        assert!(!req.stream);
    }

    #[test]
    fn chat_response_object_field() {
        let resp = ChatResponse {
            id: "r1".into(),
            object: "chat.completion".into(),
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("done"),
                finish_reason: Some("stop".into()),
            }],
            trace: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(resp.text(), "done");
    }
}
