//! The Tool Router — the policy-mediated conversation loop.
//!
//! One request: mint a request_id, emit `request.start`, then loop model ↔
//! tools until the model answers in plain text, the iteration cap trips, the
//! deadline expires, or the caller cancels. Every tool call is policy-checked
//! before execution and every decision lands in the audit log, in order:
//! `request.start` first, `request.end` last, `tool.result` never before its
//! `tool.call`.
//!
//! Tool and policy failures never surface to the client — they become
//! tool-role messages the model sees. Only adapter and audit failures fail
//! the request.

use domekit_audit::AuditLog;
use domekit_core::adapter::ModelAdapter;
use domekit_core::audit::{AuditEntry, AuditEvent};
use domekit_core::error::{AdapterError, AuditError, ToolError};
use domekit_core::message::{ChatRequest, ChatResponse, Choice, Message, TraceMeta};
use domekit_core::policy::PolicyCheck;
use domekit_core::tool::{ToolContext, ToolLimits, ToolRegistry};
use domekit_policy::PolicyEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hard ceiling on model ↔ tool round trips per request.
pub const MAX_ITERATIONS: usize = 5;

/// Longest result preview stored in a `tool.result` audit detail.
const RESULT_SUMMARY_CHARS: usize = 500;

/// Cooperative cancellation flag, observed between suspension points.
///
/// In-flight tool executions are allowed to finish and be logged; the router
/// just stops issuing new work.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Infrastructure failures that abort the request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("backend failure for request {request_id}: {source}")]
    Adapter {
        request_id: String,
        #[source]
        source: AdapterError,
    },

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl RouterError {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            RouterError::Adapter { request_id, .. } => Some(request_id),
            RouterError::Audit(_) => None,
        }
    }
}

/// Why the loop stopped early, recorded in `request.end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Completed,
    MaxIterations,
    Cancelled,
}

/// Runs the model → tool-call → model loop with policy enforcement.
pub struct ToolRouter {
    policy: Arc<PolicyEngine>,
    registry: Arc<ToolRegistry>,
    audit: Arc<AuditLog>,
    adapter: Arc<dyn ModelAdapter>,
}

impl ToolRouter {
    pub fn new(
        policy: Arc<PolicyEngine>,
        registry: Arc<ToolRegistry>,
        audit: Arc<AuditLog>,
        adapter: Arc<dyn ModelAdapter>,
    ) -> Self {
        Self {
            policy,
            registry,
            audit,
            adapter,
        }
    }

    /// Execute one chat completion with the tool-calling loop.
    pub async fn run(
        &self,
        request: ChatRequest,
        cancel: CancelToken,
    ) -> Result<ChatResponse, RouterError> {
        let manifest = self.policy.manifest().clone();
        let request_id = Uuid::new_v4().to_string();
        let model = manifest.resolve_model(&request.model).to_string();
        let policy_mode = manifest.runtime.policy_mode.as_str().to_string();
        let app_name = manifest.app.name.clone();
        let redact_prompt = manifest.audit.redact_prompt;
        let redact_outputs = manifest.audit.redact_tool_outputs;

        let started = Instant::now();
        let deadline = started + Duration::from_secs(manifest.runtime.request_timeout_secs);
        let tool_timeout = Duration::from_secs(manifest.runtime.tool_timeout_secs);

        let limits = manifest.tool_limits();
        let ctx = ToolContext {
            request_id: request_id.clone(),
            app_name: app_name.clone(),
            policy_mode: policy_mode.clone(),
            policy: self.policy.clone() as Arc<dyn PolicyCheck>,
            limits: ToolLimits {
                max_rows: limits.max_rows,
                max_bytes: limits.max_bytes,
                default_top_k: limits.default_top_k,
            },
        };

        let entry = |event: AuditEvent| {
            AuditEntry::new(&request_id, event)
                .with_app(&app_name)
                .with_model(&model)
                .with_policy_mode(&policy_mode)
        };

        info!(request_id = %request_id, model = %model, "request started");

        let mut start_detail = serde_json::Map::new();
        start_detail.insert("app".into(), serde_json::json!(app_name));
        start_detail.insert("model".into(), serde_json::json!(model));
        start_detail.insert(
            "message_count".into(),
            serde_json::json!(request.messages.len()),
        );
        let prompt_snapshot = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == domekit_core::message::Role::User)
            .map(|m| m.text().to_string())
            .unwrap_or_default();
        start_detail.insert(
            "prompt".into(),
            serde_json::json!(redact(&prompt_snapshot, redact_prompt)),
        );
        self.audit
            .append(&entry(AuditEvent::RequestStart).with_detail(start_detail))?;

        // Build the message list; prepend a system prompt when absent.
        let mut messages = request.messages;
        let has_system = messages
            .first()
            .map(|m| m.role == domekit_core::message::Role::System)
            .unwrap_or(false);
        if !has_system {
            messages.insert(
                0,
                Message::system(format!("You are {app_name}, a DomeKit-powered assistant.")),
            );
        }

        let tool_definitions = self.registry.definitions();
        let mut tools_used: Vec<String> = Vec::new();
        let mut tables_queried: Vec<String> = Vec::new();
        let mut last_message = Message::assistant("");
        let mut termination = Termination::MaxIterations;

        for iteration in 0..MAX_ITERATIONS {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                termination = Termination::Cancelled;
                break;
            }

            debug!(request_id = %request_id, iteration, "loop iteration");

            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = tokio::time::timeout(
                remaining,
                self.adapter.chat(&messages, &tool_definitions, &model),
            )
            .await;

            let reply = match reply {
                Err(_elapsed) => {
                    termination = Termination::Cancelled;
                    break;
                }
                Ok(Err(err)) => {
                    warn!(request_id = %request_id, error = %err, "adapter failed");
                    let mut detail = serde_json::Map::new();
                    detail.insert("tools_used".into(), serde_json::json!(tools_used));
                    detail.insert(
                        "duration_seconds".into(),
                        serde_json::json!(elapsed_secs(started)),
                    );
                    detail.insert(
                        "terminated_reason".into(),
                        serde_json::json!("adapter_error"),
                    );
                    detail.insert("error".into(), serde_json::json!(err.to_string()));
                    self.audit
                        .append(&entry(AuditEvent::RequestEnd).with_detail(detail))?;
                    return Err(RouterError::Adapter {
                        request_id: request_id.clone(),
                        source: err,
                    });
                }
                Ok(Ok(msg)) => msg,
            };

            if reply.tool_calls.is_empty() {
                last_message = reply;
                termination = Termination::Completed;
                break;
            }

            let tool_calls = reply.tool_calls.clone();
            messages.push(reply);

            for tc in &tool_calls {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    termination = Termination::Cancelled;
                    break;
                }

                let tool_name = tc.function.name.clone();
                let args: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));

                // Policy: tool allow-list plus tool-specific argument checks.
                let mut decision = self.policy.check_tool(&tool_name);
                if decision.is_allow() {
                    if let Some(sub) = argument_check(self.policy.as_ref(), &tool_name, &args) {
                        decision = sub;
                    }
                }

                if !decision.is_allow() {
                    let mut detail = serde_json::Map::new();
                    detail.insert("tool".into(), serde_json::json!(tool_name));
                    detail.insert("rule".into(), serde_json::json!(decision.rule));
                    detail.insert("reason".into(), serde_json::json!(decision.reason));
                    detail.insert(
                        "arguments".into(),
                        redacted_json(&args, redact_outputs),
                    );
                    self.audit
                        .append(&entry(AuditEvent::PolicyBlock).with_detail(detail))?;

                    messages.push(Message::tool_result(
                        &tc.id,
                        serde_json::json!({
                            "error": format!("Policy denied: {}", decision.reason)
                        })
                        .to_string(),
                    ));
                    continue;
                }

                let mut call_detail = serde_json::Map::new();
                call_detail.insert("tool".into(), serde_json::json!(tool_name));
                call_detail.insert("call_id".into(), serde_json::json!(tc.id));
                call_detail.insert("arguments".into(), redacted_json(&args, redact_outputs));
                self.audit
                    .append(&entry(AuditEvent::ToolCall).with_detail(call_detail))?;

                let output_content = match self.registry.get(&tool_name) {
                    None => ToolRun {
                        content: serde_json::json!({
                            "error": format!("Unknown tool: {tool_name}")
                        })
                        .to_string(),
                        success: false,
                    },
                    Some(tool) => {
                        let run = tokio::time::timeout(tool_timeout, tool.run(&ctx, args.clone()))
                            .await
                            .unwrap_or_else(|_elapsed| {
                                Err(ToolError::Timeout {
                                    tool_name: tool_name.clone(),
                                    timeout_secs: tool_timeout.as_secs(),
                                })
                            });
                        match run {
                            Ok(output) if output.success => ToolRun {
                                content: serde_json::json!({
                                    "result": output.result,
                                    "success": true
                                })
                                .to_string(),
                                success: true,
                            },
                            Ok(output) => ToolRun {
                                content: serde_json::json!({
                                    "error": output.error.unwrap_or_else(|| "tool failed".into()),
                                    "success": false
                                })
                                .to_string(),
                                success: false,
                            },
                            Err(err) => ToolRun {
                                content: serde_json::json!({
                                    "error": err.to_string(),
                                    "success": false
                                })
                                .to_string(),
                                success: false,
                            },
                        }
                    }
                };

                if !tools_used.contains(&tool_name) {
                    tools_used.push(tool_name.clone());
                }
                if tool_name == "sql_query" {
                    if let Some(query) = args.get("query").and_then(|q| q.as_str()) {
                        for table in referenced_tables(query) {
                            if !tables_queried.contains(&table) {
                                tables_queried.push(table);
                            }
                        }
                    }
                }

                let mut result_detail = serde_json::Map::new();
                result_detail.insert("tool".into(), serde_json::json!(tool_name));
                result_detail.insert("call_id".into(), serde_json::json!(tc.id));
                result_detail.insert("success".into(), serde_json::json!(output_content.success));
                result_detail.insert(
                    "result".into(),
                    serde_json::json!(redact(
                        &truncate_chars(&output_content.content, RESULT_SUMMARY_CHARS),
                        redact_outputs
                    )),
                );
                self.audit
                    .append(&entry(AuditEvent::ToolResult).with_detail(result_detail))?;

                messages.push(Message::tool_result(&tc.id, output_content.content));
            }

            if termination == Termination::Cancelled {
                break;
            }
        }

        let (finish_reason, terminated_reason) = match termination {
            Termination::Completed => ("stop", None),
            Termination::MaxIterations => ("max_iterations", Some("max_iterations")),
            Termination::Cancelled => ("cancelled", Some("cancelled")),
        };

        if termination == Termination::MaxIterations {
            last_message = Message::assistant(
                "Reached the maximum number of tool iterations without a final answer. \
                 Please narrow the request and try again.",
            );
        } else if termination == Termination::Cancelled && last_message.text().is_empty() {
            last_message = Message::assistant("Request was cancelled before completion.");
        }

        let mut end_detail = serde_json::Map::new();
        end_detail.insert("tools_used".into(), serde_json::json!(tools_used));
        end_detail.insert(
            "duration_seconds".into(),
            serde_json::json!(elapsed_secs(started)),
        );
        end_detail.insert(
            "completion".into(),
            serde_json::json!(redact(
                &truncate_chars(last_message.text(), RESULT_SUMMARY_CHARS),
                redact_prompt
            )),
        );
        if let Some(reason) = terminated_reason {
            end_detail.insert("terminated_reason".into(), serde_json::json!(reason));
        }
        self.audit
            .append(&entry(AuditEvent::RequestEnd).with_detail(end_detail))?;

        info!(
            request_id = %request_id,
            tools = tools_used.len(),
            finish_reason,
            "request finished"
        );

        let trace = TraceMeta {
            request_id: request_id.clone(),
            tools_used,
            tables_queried,
            policy_mode,
            model: model.clone(),
        };

        Ok(ChatResponse {
            id: request_id,
            object: "chat.completion".into(),
            model,
            choices: vec![Choice {
                index: 0,
                message: last_message,
                finish_reason: Some(finish_reason.into()),
            }],
            trace: Some(trace),
        })
    }
}

struct ToolRun {
    content: String,
    success: bool,
}

/// Tool-specific argument sub-checks, run after the tool allow-list check.
fn argument_check(
    policy: &PolicyEngine,
    tool_name: &str,
    args: &serde_json::Value,
) -> Option<domekit_core::policy::PolicyDecision> {
    use domekit_core::policy::VectorOp;

    let arg = |key: &str| args.get(key).and_then(|v| v.as_str());
    match tool_name {
        "sql_query" => arg("db_path").map(|p| policy.check_sqlite(p)),
        "read_file" => arg("path").map(|p| policy.check_read(p)),
        "write_file" => arg("path").map(|p| policy.check_write(p)),
        "vector_search" => arg("collection").map(|c| policy.check_vector(c, VectorOp::Read)),
        "vector_manage" => arg("collection").map(|c| policy.check_vector(c, VectorOp::Write)),
        _ => None,
    }
}

/// Tables referenced in FROM / JOIN clauses, for the response trace.
fn referenced_tables(query: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut tokens = query.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let keyword = token.to_ascii_uppercase();
        if keyword == "FROM" || keyword == "JOIN" {
            if let Some(next) = tokens.peek() {
                if next.starts_with('(') {
                    continue;
                }
                let name: String = next
                    .trim_matches(|c: char| c == ')' || c == ',' || c == ';')
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                    .collect();
                if !name.is_empty()
                    && !name.chars().next().is_some_and(|c| c.is_numeric())
                    && !tables.contains(&name)
                {
                    tables.push(name);
                }
            }
        }
    }
    tables
}

fn redact(value: &str, redacted: bool) -> String {
    if redacted {
        "[redacted]".into()
    } else {
        value.to_string()
    }
}

fn redacted_json(value: &serde_json::Value, redacted: bool) -> serde_json::Value {
    if redacted {
        serde_json::json!("[redacted]")
    } else {
        value.clone()
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}
