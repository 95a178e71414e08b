//! Metrics aggregation over the audit log.
//!
//! Computes throughput buckets, latency percentiles (request.start joined to
//! request.end by request_id), tool usage, and error rates for a time
//! window. Like alerts, metrics are derived on demand.

use chrono::{DateTime, Duration, Utc};
use domekit_core::audit::{AuditEntry, AuditEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputBucket {
    pub time: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorRates {
    pub total_requests: usize,
    pub policy_blocks: usize,
    pub tool_calls: usize,
    pub block_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_entries: usize,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
    pub event_counts: HashMap<String, usize>,
}

/// The full metrics report for a window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub throughput: Vec<ThroughputBucket>,
    pub latency: LatencyStats,
    pub tool_usage: Vec<ToolUsage>,
    pub error_rates: ErrorRates,
    pub summary: Summary,
}

/// Compute aggregated metrics from audit entries.
pub fn compute_metrics(
    entries: &[AuditEntry],
    since: Option<DateTime<Utc>>,
    window_seconds: i64,
) -> Metrics {
    let window: Vec<&AuditEntry> = entries
        .iter()
        .filter(|e| since.map_or(true, |ts| e.ts >= ts))
        .collect();

    Metrics {
        throughput: throughput_buckets(&window, window_seconds),
        latency: latency_percentiles(&window),
        tool_usage: tool_usage(&window),
        error_rates: error_rates(&window),
        summary: summary(&window),
    }
}

fn throughput_buckets(entries: &[&AuditEntry], window_seconds: i64) -> Vec<ThroughputBucket> {
    let mut starts: Vec<DateTime<Utc>> = entries
        .iter()
        .filter(|e| e.event == AuditEvent::RequestStart)
        .map(|e| e.ts)
        .collect();
    if starts.is_empty() {
        return Vec::new();
    }
    starts.sort();

    let step = Duration::seconds(window_seconds.max(1));
    let mut buckets = Vec::new();
    let mut bucket_start = starts[0];
    let last = *starts.last().expect("non-empty");

    while bucket_start <= last {
        let bucket_end = bucket_start + step;
        let count = starts
            .iter()
            .filter(|ts| **ts >= bucket_start && **ts < bucket_end)
            .count();
        buckets.push(ThroughputBucket {
            time: bucket_start,
            count,
        });
        bucket_start = bucket_end;
    }
    buckets
}

fn latency_percentiles(entries: &[&AuditEntry]) -> LatencyStats {
    let mut starts: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut durations: Vec<f64> = Vec::new();

    for e in entries {
        match e.event {
            AuditEvent::RequestStart => {
                starts.insert(e.request_id.as_str(), e.ts);
            }
            AuditEvent::RequestEnd => {
                if let Some(start) = starts.get(e.request_id.as_str()) {
                    let dt = (e.ts - *start).num_microseconds().unwrap_or(0) as f64 / 1e6;
                    durations.push(dt.max(0.0));
                }
            }
            _ => {}
        }
    }

    if durations.is_empty() {
        return LatencyStats::default();
    }
    durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = durations.len();
    let pick = |q: f64| {
        let idx = ((n as f64 * q) as usize).min(n - 1);
        (durations[idx] * 1000.0).round() / 1000.0
    };
    LatencyStats {
        p50: pick(0.50),
        p95: pick(0.95),
        p99: pick(0.99),
        count: n,
    }
}

fn tool_usage(entries: &[&AuditEntry]) -> Vec<ToolUsage> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for e in entries {
        if e.event == AuditEvent::ToolCall {
            let tool = e.detail_str("tool");
            let tool = if tool.is_empty() { "unknown" } else { tool };
            *counts.entry(tool.to_string()).or_default() += 1;
        }
    }
    let mut usage: Vec<ToolUsage> = counts
        .into_iter()
        .map(|(tool, count)| ToolUsage { tool, count })
        .collect();
    usage.sort_by(|a, b| b.count.cmp(&a.count).then(a.tool.cmp(&b.tool)));
    usage
}

fn error_rates(entries: &[&AuditEntry]) -> ErrorRates {
    let count = |ev: AuditEvent| entries.iter().filter(|e| e.event == ev).count();
    let total_requests = count(AuditEvent::RequestStart);
    let policy_blocks = count(AuditEvent::PolicyBlock);
    let tool_calls = count(AuditEvent::ToolCall);
    ErrorRates {
        total_requests,
        policy_blocks,
        tool_calls,
        block_rate: (policy_blocks as f64 / total_requests.max(1) as f64 * 1e4).round() / 1e4,
    }
}

fn summary(entries: &[&AuditEntry]) -> Summary {
    if entries.is_empty() {
        return Summary::default();
    }
    let mut event_counts: HashMap<String, usize> = HashMap::new();
    let mut first = entries[0].ts;
    let mut last = entries[0].ts;
    for e in entries {
        *event_counts.entry(e.event.as_str().to_string()).or_default() += 1;
        first = first.min(e.ts);
        last = last.max(e.ts);
    }
    Summary {
        total_entries: entries.len(),
        first_entry: Some(first),
        last_entry: Some(last),
        event_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domekit_core::audit::AuditEvent::*;

    fn at(base: DateTime<Utc>, offset_ms: i64, request_id: &str, event: AuditEvent) -> AuditEntry {
        let mut e = AuditEntry::new(request_id, event);
        e.ts = base + Duration::milliseconds(offset_ms);
        e
    }

    fn tool_call(base: DateTime<Utc>, offset_ms: i64, request_id: &str, tool: &str) -> AuditEntry {
        let mut detail = serde_json::Map::new();
        detail.insert("tool".into(), serde_json::json!(tool));
        let mut e = AuditEntry::new(request_id, ToolCall).with_detail(detail);
        e.ts = base + Duration::milliseconds(offset_ms);
        e
    }

    #[test]
    fn latency_joins_start_end_by_request_id() {
        let base = Utc::now();
        let entries = vec![
            at(base, 0, "a", RequestStart),
            at(base, 0, "b", RequestStart),
            at(base, 100, "a", RequestEnd),
            at(base, 300, "b", RequestEnd),
        ];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.latency.count, 2);
        assert!(m.latency.p50 >= 0.1 && m.latency.p50 <= 0.3);
        assert!((m.latency.p99 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn unmatched_end_ignored() {
        let base = Utc::now();
        let entries = vec![at(base, 0, "orphan", RequestEnd)];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.latency.count, 0);
    }

    #[test]
    fn throughput_bucketing() {
        let base = Utc::now();
        let entries = vec![
            at(base, 0, "a", RequestStart),
            at(base, 500, "b", RequestStart),
            at(base, 61_000, "c", RequestStart),
        ];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.throughput.len(), 2);
        assert_eq!(m.throughput[0].count, 2);
        assert_eq!(m.throughput[1].count, 1);
    }

    #[test]
    fn tool_usage_sorted_by_count() {
        let base = Utc::now();
        let entries = vec![
            tool_call(base, 0, "a", "sql_query"),
            tool_call(base, 1, "a", "sql_query"),
            tool_call(base, 2, "a", "read_file"),
        ];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.tool_usage[0].tool, "sql_query");
        assert_eq!(m.tool_usage[0].count, 2);
        assert_eq!(m.tool_usage[1].tool, "read_file");
    }

    #[test]
    fn error_rate_is_blocks_over_requests() {
        let base = Utc::now();
        let entries = vec![
            at(base, 0, "a", RequestStart),
            at(base, 1, "b", RequestStart),
            at(base, 2, "a", PolicyBlock),
        ];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.error_rates.total_requests, 2);
        assert_eq!(m.error_rates.policy_blocks, 1);
        assert!((m.error_rates.block_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn summary_event_histogram() {
        let base = Utc::now();
        let entries = vec![
            at(base, 0, "a", RequestStart),
            at(base, 1, "a", RequestEnd),
            at(base, 2, "b", RequestStart),
        ];
        let m = compute_metrics(&entries, None, 60);
        assert_eq!(m.summary.total_entries, 3);
        assert_eq!(m.summary.event_counts["request.start"], 2);
        assert_eq!(m.summary.event_counts["request.end"], 1);
    }

    #[test]
    fn since_filter_applies() {
        let base = Utc::now();
        let entries = vec![
            at(base, 0, "a", RequestStart),
            at(base, 10_000, "b", RequestStart),
        ];
        let m = compute_metrics(&entries, Some(base + Duration::seconds(5)), 60);
        assert_eq!(m.error_rates.total_requests, 1);
    }

    #[test]
    fn empty_log_is_empty_metrics() {
        let m = compute_metrics(&[], None, 60);
        assert!(m.throughput.is_empty());
        assert_eq!(m.latency.count, 0);
        assert_eq!(m.summary.total_entries, 0);
    }
}
