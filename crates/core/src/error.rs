//! Error types for the DomeKit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all DomeKit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model adapter errors ---
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Audit log errors ---
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    // --- Vector store errors ---
    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from the model backend (Ollama or compatible).
///
/// Adapter errors are the only tool-loop errors that surface to the client;
/// everything else becomes part of the conversation the model sees.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("Backend request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Backend unreachable: {0}")]
    Network(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

/// Per-tool recoverable failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("File too large: {path} exceeds {max_bytes} bytes")]
    FileTooLarge { path: String, max_bytes: u64 },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

/// Audit log failures — these are infrastructure errors and fail the request.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed audit entry at line {line}: {message}")]
    MalformedEntry { line: usize, message: String },
}

/// Vector store failures.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Vector storage error: {0}")]
    Storage(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
