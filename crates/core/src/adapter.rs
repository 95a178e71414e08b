//! Model and embedding adapter traits — the abstraction over LLM backends.
//!
//! An adapter knows how to send a conversation to a model backend and get a
//! message back, either plain text or structured tool-call requests. It is
//! purely a translator: it performs no policy checks and no audit writes.

use crate::error::AdapterError;
use crate::message::Message;
use crate::tool::ToolDefinition;
use async_trait::async_trait;

/// The model adapter contract.
///
/// Implementations translate between DomeKit messages and the backend wire
/// protocol, including a prompt-based tool-calling fallback for backends
/// whose models lack native tool support.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// A human-readable name for this backend (e.g., "ollama").
    fn name(&self) -> &str;

    /// Exchange a conversation with the model.
    ///
    /// Returns an assistant message that carries either text content or
    /// `tool_calls` (possibly both).
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> std::result::Result<Message, AdapterError>;

    /// List model identifiers the backend currently serves.
    async fn list_models(&self) -> std::result::Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }

    /// Can we reach the backend?
    async fn health_check(&self) -> bool {
        true
    }
}

/// The embedding adapter contract.
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    /// The embedding model identifier.
    fn model_name(&self) -> &str;

    /// Generate one embedding vector per input text.
    async fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, AdapterError>;
}
