//! Security-alert heuristics — a read-only scan over the audit log.
//!
//! Alerts are derived, never persisted; every call recomputes them from the
//! entries it is given. Four detectors:
//!
//! - `path_traversal` — a `policy.block` whose detail carries `..` or a
//!   non-whitelisted prefix (high)
//! - `sql_injection` — a `sql_query` call whose query matches the curated
//!   pattern set (critical)
//! - `burst_denial` — ≥ 5 `policy.block` within a sliding 60 s window from
//!   one request_id (medium)
//! - `repeated_denial` — the same (tool, reason) blocked ≥ 10 times (low)

use chrono::{DateTime, Duration, Utc};
use domekit_core::audit::{AuditEntry, AuditEvent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Blocks inside the window that trip `burst_denial`.
pub const BURST_THRESHOLD: usize = 5;
/// Sliding window for `burst_denial`, seconds.
pub const BURST_WINDOW_SECS: i64 = 60;
/// Identical (tool, reason) blocks that trip `repeated_denial`.
pub const REPEAT_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single derived alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub event: String,
    pub detail: serde_json::Map<String, serde_json::Value>,
    pub message: String,
}

fn traversal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.\./|\.\.\\").expect("static regex"))
}

fn injection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(DROP\s+TABLE|ATTACH\s+DATABASE|DELETE\s+FROM|UNION\s+SELECT\s.*\bFROM\b|INSERT\s+INTO\s.*SELECT|OR\s+1\s*=\s*1)|;\s*--|--\s*;|'\s*OR\s+'",
        )
        .expect("static regex")
    })
}

/// Run all detectors over `entries`, newest alerts first, capped at `limit`.
pub fn detect_alerts(
    entries: &[AuditEntry],
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> Vec<Alert> {
    let window: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| since.map_or(true, |ts| e.ts >= ts))
        .collect();

    let mut alerts = Vec::new();
    alerts.extend(detect_path_traversal(&window));
    alerts.extend(detect_sql_injection(&window));
    alerts.extend(detect_burst_denial(&window));
    alerts.extend(detect_repeated_denial(&window));

    alerts.sort_by(|a, b| b.ts.cmp(&a.ts));
    alerts.truncate(limit);
    alerts
}

fn detect_path_traversal(entries: &[&AuditEntry]) -> Vec<Alert> {
    entries
        .iter()
        .filter(|e| e.event == AuditEvent::PolicyBlock)
        .filter(|e| {
            let detail = serde_json::Value::Object(e.detail.clone()).to_string();
            traversal_re().is_match(&detail)
                || e.detail_str("rule").starts_with("filesystem.")
        })
        .map(|e| Alert {
            kind: "path_traversal".into(),
            severity: Severity::High,
            ts: e.ts,
            request_id: e.request_id.clone(),
            event: e.event.as_str().into(),
            detail: e.detail.clone(),
            message: "Path escape attempt blocked by filesystem policy".into(),
        })
        .collect()
}

fn detect_sql_injection(entries: &[&AuditEntry]) -> Vec<Alert> {
    entries
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::ToolCall | AuditEvent::PolicyBlock))
        .filter_map(|e| {
            let query = e
                .detail
                .get("arguments")
                .and_then(|a| a.get("query"))
                .and_then(|q| q.as_str())?;
            if !injection_re().is_match(query) {
                return None;
            }
            let preview: String = query.chars().take(120).collect();
            Some(Alert {
                kind: "sql_injection".into(),
                severity: Severity::Critical,
                ts: e.ts,
                request_id: e.request_id.clone(),
                event: e.event.as_str().into(),
                detail: e.detail.clone(),
                message: format!("SQL injection pattern detected: {preview}"),
            })
        })
        .collect()
}

fn detect_burst_denial(entries: &[&AuditEntry]) -> Vec<Alert> {
    let mut per_request: HashMap<&str, Vec<&AuditEntry>> = HashMap::new();
    for &e in entries {
        if e.event == AuditEvent::PolicyBlock {
            per_request.entry(e.request_id.as_str()).or_default().push(e);
        }
    }

    let mut alerts = Vec::new();
    for (request_id, blocks) in per_request {
        if blocks.len() < BURST_THRESHOLD {
            continue;
        }
        for i in 0..blocks.len() {
            let window_end = blocks[i].ts + Duration::seconds(BURST_WINDOW_SECS);
            let in_window = blocks[i..].iter().take_while(|b| b.ts <= window_end).count();
            if in_window >= BURST_THRESHOLD {
                let mut detail = serde_json::Map::new();
                detail.insert("count".into(), serde_json::json!(in_window));
                detail.insert("window_seconds".into(), serde_json::json!(BURST_WINDOW_SECS));
                alerts.push(Alert {
                    kind: "burst_denial".into(),
                    severity: Severity::Medium,
                    ts: blocks[i].ts,
                    request_id: request_id.to_string(),
                    event: "policy.block".into(),
                    detail,
                    message: format!(
                        "{in_window} policy blocks within {BURST_WINDOW_SECS}s from one request"
                    ),
                });
                // One alert per request is enough
                break;
            }
        }
    }
    alerts
}

fn detect_repeated_denial(entries: &[&AuditEntry]) -> Vec<Alert> {
    let mut counts: HashMap<(String, String), (usize, DateTime<Utc>)> = HashMap::new();
    for e in entries {
        if e.event != AuditEvent::PolicyBlock {
            continue;
        }
        let key = (
            e.detail_str("tool").to_string(),
            e.detail_str("reason").to_string(),
        );
        let slot = counts.entry(key).or_insert((0, e.ts));
        slot.0 += 1;
        slot.1 = e.ts;
    }

    counts
        .into_iter()
        .filter(|(_, (count, _))| *count >= REPEAT_THRESHOLD)
        .map(|((tool, reason), (count, ts))| {
            let mut detail = serde_json::Map::new();
            detail.insert("tool".into(), serde_json::json!(tool));
            detail.insert("reason".into(), serde_json::json!(reason));
            detail.insert("count".into(), serde_json::json!(count));
            Alert {
                kind: "repeated_denial".into(),
                severity: Severity::Low,
                ts,
                request_id: String::new(),
                event: "policy.block".into(),
                detail,
                message: format!("Tool '{tool}' blocked {count} times — possible probing"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(request_id: &str, tool: &str, reason: &str, rule: &str) -> AuditEntry {
        let mut detail = serde_json::Map::new();
        detail.insert("tool".into(), serde_json::json!(tool));
        detail.insert("reason".into(), serde_json::json!(reason));
        detail.insert("rule".into(), serde_json::json!(rule));
        AuditEntry::new(request_id, AuditEvent::PolicyBlock).with_detail(detail)
    }

    fn sql_call(request_id: &str, query: &str) -> AuditEntry {
        let mut detail = serde_json::Map::new();
        detail.insert("tool".into(), serde_json::json!("sql_query"));
        detail.insert(
            "arguments".into(),
            serde_json::json!({"db_path": "/tmp/h.db", "query": query}),
        );
        AuditEntry::new(request_id, AuditEvent::ToolCall).with_detail(detail)
    }

    #[test]
    fn path_traversal_detected_from_dotdot() {
        let entries = vec![block(
            "r1",
            "read_file",
            "Path '/app/data/../../etc/shadow' is not in any read allow list",
            "filesystem.read",
        )];
        let alerts = detect_alerts(&entries, None, 50);
        assert!(alerts.iter().any(|a| a.kind == "path_traversal"));
        let alert = alerts.iter().find(|a| a.kind == "path_traversal").unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.request_id, "r1");
    }

    #[test]
    fn sql_injection_patterns() {
        for query in [
            "DROP TABLE users",
            "SELECT 1 UNION SELECT password FROM secrets",
            "ATTACH DATABASE '/etc/x' AS evil",
            "SELECT * FROM t WHERE a = '' OR 1=1",
            "SELECT 1; -- comment",
        ] {
            let alerts = detect_alerts(&[sql_call("r", query)], None, 50);
            assert!(
                alerts.iter().any(|a| a.kind == "sql_injection"),
                "should flag: {query}"
            );
            assert_eq!(
                alerts
                    .iter()
                    .find(|a| a.kind == "sql_injection")
                    .unwrap()
                    .severity,
                Severity::Critical
            );
        }
    }

    #[test]
    fn benign_sql_not_flagged() {
        for query in [
            "SELECT COUNT(*) c FROM t",
            "SELECT name, value FROM metrics WHERE day > '2026-01-01'",
        ] {
            let alerts = detect_alerts(&[sql_call("r", query)], None, 50);
            assert!(
                !alerts.iter().any(|a| a.kind == "sql_injection"),
                "false positive on: {query}"
            );
        }
    }

    #[test]
    fn burst_denial_per_request() {
        let mut entries = Vec::new();
        for _ in 0..BURST_THRESHOLD {
            entries.push(block("burst-req", "shell", "not allowed", "tools.allow"));
        }
        // Spread across two different requests: no burst
        let alerts = detect_alerts(&entries, None, 50);
        assert!(alerts.iter().any(|a| a.kind == "burst_denial"));

        let mut spread = Vec::new();
        for i in 0..BURST_THRESHOLD {
            spread.push(block(&format!("req-{i}"), "shell", "not allowed", "tools.allow"));
        }
        let alerts = detect_alerts(&spread, None, 50);
        assert!(!alerts.iter().any(|a| a.kind == "burst_denial"));
    }

    #[test]
    fn repeated_denial_needs_threshold() {
        let mut entries = Vec::new();
        for i in 0..REPEAT_THRESHOLD {
            entries.push(block(
                &format!("req-{i}"),
                "vector_manage",
                "Collection 'x' is not in the vector write allow list",
                "data.vector_write",
            ));
        }
        let alerts = detect_alerts(&entries, None, 50);
        let alert = alerts.iter().find(|a| a.kind == "repeated_denial").unwrap();
        assert_eq!(alert.severity, Severity::Low);
        assert_eq!(alert.detail["count"], serde_json::json!(REPEAT_THRESHOLD));

        let fewer = &entries[..REPEAT_THRESHOLD - 1];
        let alerts = detect_alerts(fewer, None, 50);
        assert!(!alerts.iter().any(|a| a.kind == "repeated_denial"));
    }

    #[test]
    fn limit_and_order() {
        let mut entries = Vec::new();
        for i in 0..3 {
            entries.push(block(&format!("r{i}"), "read_file", "../ escape", "filesystem.read"));
        }
        let alerts = detect_alerts(&entries, None, 2);
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].ts >= alerts[1].ts, "newest first");
    }
}
