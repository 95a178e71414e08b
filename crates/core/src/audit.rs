//! Audit entry types — one append-only record per runtime event.
//!
//! Entries are keyed by request_id and never mutated after write.
//! Timestamps serialize as RFC-3339 with microsecond precision, UTC (`Z`).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The five audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEvent {
    #[serde(rename = "request.start")]
    RequestStart,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "request.end")]
    RequestEnd,
    #[serde(rename = "policy.block")]
    PolicyBlock,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::RequestStart => "request.start",
            AuditEvent::ToolCall => "tool.call",
            AuditEvent::ToolResult => "tool.result",
            AuditEvent::RequestEnd => "request.end",
            AuditEvent::PolicyBlock => "policy.block",
        }
    }
}

impl std::str::FromStr for AuditEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request.start" => Ok(AuditEvent::RequestStart),
            "tool.call" => Ok(AuditEvent::ToolCall),
            "tool.result" => Ok(AuditEvent::ToolResult),
            "request.end" => Ok(AuditEvent::RequestEnd),
            "policy.block" => Ok(AuditEvent::PolicyBlock),
            other => Err(format!("unknown audit event: {other}")),
        }
    }
}

/// A single audit log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "ts_micros")]
    pub ts: DateTime<Utc>,

    pub request_id: String,

    pub event: AuditEvent,

    #[serde(default)]
    pub app: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_policy_mode")]
    pub policy_mode: String,

    /// Free-form structured detail: tool name, rule, arguments, etc.
    #[serde(default)]
    pub detail: serde_json::Map<String, serde_json::Value>,
}

fn default_policy_mode() -> String {
    "local_only".into()
}

impl AuditEntry {
    pub fn new(request_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            ts: Utc::now(),
            request_id: request_id.into(),
            event,
            app: String::new(),
            model: String::new(),
            policy_mode: default_policy_mode(),
            detail: serde_json::Map::new(),
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_policy_mode(mut self, mode: impl Into<String>) -> Self {
        self.policy_mode = mode.into();
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Map<String, serde_json::Value>) -> Self {
        self.detail = detail;
        self
    }

    /// A detail field as a string, or "" when absent.
    pub fn detail_str(&self, key: &str) -> &str {
        self.detail.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }
}

/// RFC-3339 serialization pinned to microsecond precision with a `Z` suffix.
mod ts_micros {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw: String = serde::Deserialize::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
