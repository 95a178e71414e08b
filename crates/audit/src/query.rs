//! Audit log queries — filtered, paginated reads in file order.
//!
//! File order equals append order, so no sorting happens here.

use chrono::{DateTime, Utc};
use domekit_core::audit::{AuditEntry, AuditEvent};
use domekit_core::error::AuditError;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Filters for [`query_filtered`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub event: Option<AuditEvent>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Read every entry from the log file, skipping blank lines.
pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(line).map_err(|err| AuditError::MalformedEntry {
                line: idx + 1,
                message: err.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Return a filtered page of entries plus the total matching count.
///
/// Results come back in file order (= append order).
pub fn query_filtered(
    path: impl AsRef<Path>,
    filter: &QueryFilter,
) -> Result<(Vec<AuditEntry>, usize), AuditError> {
    let matching: Vec<AuditEntry> = read_all(path)?
        .into_iter()
        .filter(|e| {
            filter.event.map_or(true, |ev| e.event == ev)
                && filter
                    .request_id
                    .as_deref()
                    .map_or(true, |rid| e.request_id == rid)
                && filter.since.map_or(true, |ts| e.ts >= ts)
                && filter.until.map_or(true, |ts| e.ts <= ts)
        })
        .collect();

    let total = matching.len();
    let limit = filter.limit.unwrap_or(100);
    let page = matching
        .into_iter()
        .skip(filter.offset)
        .take(limit)
        .collect();
    Ok((page, total))
}

/// The last `n` entries.
pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<AuditEntry>, AuditError> {
    let entries = read_all(path)?;
    let skip = entries.len().saturating_sub(n);
    Ok(entries.into_iter().skip(skip).collect())
}
