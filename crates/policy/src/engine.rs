//! The policy engine — a pure decision function over (action, manifest).
//!
//! Allow-lists are compiled once per manifest snapshot: sqlite paths and
//! plain filesystem entries are canonicalized up front, glob entries compile
//! to matchers with literal path separators (`*` stays inside one segment,
//! `**` crosses segments). The engine is stateless after construction and
//! shared via `Arc`; in-flight requests keep their snapshot when the
//! manifest is replaced.

use crate::path::{canonical_path, starts_at_boundary, PathError};
use domekit_core::policy::{PolicyCheck, PolicyDecision, VectorOp};
use domekit_manifest::{Manifest, PolicyMode};
use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Engine construction failures (bad glob patterns in the manifest).
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid glob pattern '{pattern}' in {rule}: {message}")]
    BadPattern {
        rule: String,
        pattern: String,
        message: String,
    },
}

/// One compiled filesystem allow entry.
enum PathRule {
    /// A canonical prefix, matched only at path-component boundaries.
    Prefix { canonical: String, raw: String },
    /// A glob over the canonical path string.
    Glob { matcher: GlobMatcher, raw: String },
}

impl PathRule {
    fn matches(&self, canonical: &str) -> bool {
        match self {
            PathRule::Prefix { canonical: prefix, .. } => starts_at_boundary(canonical, prefix),
            PathRule::Glob { matcher, .. } => matcher.is_match(Path::new(canonical)),
        }
    }

    fn raw(&self) -> &str {
        match self {
            PathRule::Prefix { raw, .. } | PathRule::Glob { raw, .. } => raw,
        }
    }
}

/// Hosts that are always reachable even under `outbound: deny`.
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// The concrete policy engine driven by a parsed Manifest.
pub struct PolicyEngine {
    manifest: Arc<Manifest>,
    sqlite_allow: Vec<String>,
    read_rules: Vec<PathRule>,
    write_rules: Vec<PathRule>,
    vector_read: GlobSet,
    vector_write: GlobSet,
}

impl PolicyEngine {
    /// Compile the manifest's allow-lists into a ready-to-check engine.
    pub fn new(manifest: Arc<Manifest>) -> Result<Self, PolicyError> {
        let sqlite_allow = manifest
            .policy
            .data
            .sqlite
            .allow
            .iter()
            .map(|entry| canonical_allow_entry(entry, "data.sqlite.allow"))
            .collect();

        let read_rules = compile_path_rules(
            &manifest.policy.data.filesystem.allow_read,
            "data.filesystem.allow_read",
        )?;
        let write_rules = compile_path_rules(
            &manifest.policy.data.filesystem.allow_write,
            "data.filesystem.allow_write",
        )?;

        let vector_read = compile_glob_set(&manifest.policy.data.vector.allow, "data.vector.allow")?;
        let vector_write = compile_glob_set(
            &manifest.policy.data.vector.allow_write,
            "data.vector.allow_write",
        )?;

        Ok(Self {
            manifest,
            sqlite_allow,
            read_rules,
            write_rules,
            vector_read,
            vector_write,
        })
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn mode(&self) -> PolicyMode {
        self.manifest.runtime.policy_mode
    }

    fn developer_decision(&self) -> Option<PolicyDecision> {
        if self.mode() == PolicyMode::Developer {
            Some(PolicyDecision::allow(
                "developer_mode",
                "Developer mode allows all access",
            ))
        } else {
            None
        }
    }

    fn check_path_rules(
        &self,
        path: &str,
        rules: &[PathRule],
        allow_rule: &str,
        deny_rule: &str,
        access: &str,
    ) -> PolicyDecision {
        if let Some(d) = self.developer_decision() {
            return d;
        }

        let canonical = match canonical_path(path) {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(PathError::NulByte) => {
                return PolicyDecision::deny(deny_rule, "Path contains a NUL byte");
            }
            Err(err) => {
                return PolicyDecision::deny(
                    deny_rule,
                    format!("Path '{path}' cannot be resolved: {err}"),
                );
            }
        };

        for rule in rules {
            if rule.matches(&canonical) {
                return PolicyDecision::allow(
                    allow_rule,
                    format!("Path '{path}' matches {access} entry '{}'", rule.raw()),
                );
            }
        }

        PolicyDecision::deny(
            deny_rule,
            format!("Path '{path}' is not in any {access} allow list"),
        )
    }
}

/// Canonicalize an allow-list entry at compile time. Entries whose targets
/// do not exist are kept in normalized form and logged, not rejected.
fn canonical_allow_entry(entry: &str, rule: &str) -> String {
    if !Path::new(entry).exists() {
        warn!(rule, entry, "allow-list entry does not exist on disk");
    }
    match canonical_path(entry) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(err) => {
            warn!(rule, entry, %err, "allow-list entry could not be canonicalized");
            entry.to_string()
        }
    }
}

fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

fn compile_path_rules(entries: &[String], rule: &str) -> Result<Vec<PathRule>, PolicyError> {
    entries
        .iter()
        .map(|entry| {
            if is_glob(entry) {
                let matcher = path_glob(entry, rule)?.compile_matcher();
                Ok(PathRule::Glob {
                    matcher,
                    raw: entry.clone(),
                })
            } else {
                Ok(PathRule::Prefix {
                    canonical: canonical_allow_entry(entry, rule),
                    raw: entry.clone(),
                })
            }
        })
        .collect()
}

/// Compile one glob with segment-local `*` (a `*` never crosses `/`; `**`
/// still matches zero or more segments).
fn path_glob(pattern: &str, rule: &str) -> Result<Glob, PolicyError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| PolicyError::BadPattern {
            rule: rule.into(),
            pattern: pattern.into(),
            message: err.to_string(),
        })
}

fn compile_glob_set(patterns: &[String], rule: &str) -> Result<GlobSet, PolicyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(path_glob(pattern, rule)?);
    }
    builder.build().map_err(|err| PolicyError::BadPattern {
        rule: rule.into(),
        pattern: String::new(),
        message: err.to_string(),
    })
}

impl PolicyCheck for PolicyEngine {
    fn check_tool(&self, tool_name: &str) -> PolicyDecision {
        if let Some(d) = self.developer_decision() {
            return d;
        }
        if self
            .manifest
            .policy
            .tools
            .allow
            .iter()
            .any(|t| t == tool_name)
        {
            PolicyDecision::allow(
                "tools.allow",
                format!("Tool '{tool_name}' is in the allow list"),
            )
        } else {
            PolicyDecision::deny(
                "tools.allow",
                format!("Tool '{tool_name}' is not in the allow list"),
            )
        }
    }

    fn check_sqlite(&self, path: &str) -> PolicyDecision {
        if let Some(d) = self.developer_decision() {
            return d;
        }
        let canonical = match canonical_path(path) {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(err) => {
                return PolicyDecision::deny(
                    "data.sqlite",
                    format!("Database path '{path}' cannot be resolved: {err}"),
                );
            }
        };
        if self.sqlite_allow.iter().any(|a| a == &canonical) {
            PolicyDecision::allow(
                "data.sqlite.allow",
                format!("SQLite path '{path}' is allowed"),
            )
        } else {
            PolicyDecision::deny(
                "data.sqlite",
                format!("Database path not allowed: {path}"),
            )
        }
    }

    fn check_read(&self, path: &str) -> PolicyDecision {
        self.check_path_rules(
            path,
            &self.read_rules,
            "data.filesystem.allow_read",
            "filesystem.read",
            "read",
        )
    }

    fn check_write(&self, path: &str) -> PolicyDecision {
        self.check_path_rules(
            path,
            &self.write_rules,
            "data.filesystem.allow_write",
            "filesystem.write",
            "write",
        )
    }

    fn check_network(&self, host: &str) -> PolicyDecision {
        if let Some(d) = self.developer_decision() {
            return d;
        }
        let network = &self.manifest.policy.network;

        if network.outbound == "allow" {
            return PolicyDecision::allow(
                "network.outbound",
                "Outbound network is globally allowed",
            );
        }
        if network.allow_domains.iter().any(|d| d == host) {
            return PolicyDecision::allow(
                "network.allow_domains",
                format!("Host '{host}' is in allow_domains"),
            );
        }
        if LOOPBACK_HOSTS.contains(&host) {
            return PolicyDecision::allow(
                "network.loopback",
                format!("Host '{host}' is loopback"),
            );
        }
        PolicyDecision::deny(
            "network.outbound",
            format!("Outbound denied; host '{host}' is not in allow_domains"),
        )
    }

    fn check_vector(&self, collection: &str, op: VectorOp) -> PolicyDecision {
        if let Some(d) = self.developer_decision() {
            return d;
        }
        let (set, allow_rule, deny_rule, verb) = match op {
            VectorOp::Read => (
                &self.vector_read,
                "data.vector.allow",
                "data.vector_read",
                "read",
            ),
            VectorOp::Write => (
                &self.vector_write,
                "data.vector.allow_write",
                "data.vector_write",
                "write",
            ),
        };
        if set.is_match(collection) {
            PolicyDecision::allow(
                allow_rule,
                format!("Collection '{collection}' matches a vector {verb} pattern"),
            )
        } else {
            PolicyDecision::deny(
                deny_rule,
                format!("Collection '{collection}' is not in the vector {verb} allow list"),
            )
        }
    }
}
