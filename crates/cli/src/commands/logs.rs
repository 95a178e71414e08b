//! `domekit logs` — query and pretty-print the audit log.

use domekit_audit::{query_filtered, tail, QueryFilter};
use domekit_core::audit::AuditEntry;

pub fn run(
    audit_path: &str,
    request_id: Option<String>,
    event: Option<String>,
    limit: usize,
    json: bool,
) -> i32 {
    if !std::path::Path::new(audit_path).exists() {
        eprintln!("No audit log found at {audit_path}");
        return 1;
    }

    let entries = if request_id.is_some() || event.is_some() {
        let parsed_event = match event.as_deref() {
            None => None,
            Some(raw) => match raw.parse() {
                Ok(ev) => Some(ev),
                Err(err) => {
                    eprintln!("{err}");
                    eprintln!(
                        "Valid events: request.start, tool.call, tool.result, request.end, policy.block"
                    );
                    return 1;
                }
            },
        };
        let filter = QueryFilter {
            event: parsed_event,
            request_id,
            limit: Some(limit),
            ..Default::default()
        };
        match query_filtered(audit_path, &filter) {
            Ok((entries, _)) => entries,
            Err(err) => {
                eprintln!("Failed to read audit log: {err}");
                return 1;
            }
        }
    } else {
        match tail(audit_path, limit) {
            Ok(entries) => entries,
            Err(err) => {
                eprintln!("Failed to read audit log: {err}");
                return 1;
            }
        }
    };

    if entries.is_empty() {
        println!("No matching audit entries.");
        return 0;
    }

    for entry in &entries {
        print_entry(entry, json);
    }
    0
}

fn print_entry(entry: &AuditEntry, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(entry) {
            println!("{line}");
        }
        return;
    }
    let ts = entry.ts.format("%Y-%m-%dT%H:%M:%S");
    let rid: String = entry.request_id.chars().take(8).collect();
    let detail =
        serde_json::to_string(&entry.detail).unwrap_or_else(|_| "{}".into());
    println!("{ts}  [{:16}]  {rid}  {detail}", entry.event.as_str());
}
