//! Manifest (domekit.yaml) schema, loader, and validation.
//!
//! The manifest is the declarative policy document governing one application
//! instance. It is immutable after load; reloads replace the whole object
//! atomically (the runtime holds it behind an `Arc` swap).
//!
//! Unknown fields are rejected so a typoed allow-list never silently
//! loosens policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Manifest load/validation failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

// ── Top-level sections ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppInfo {
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

fn default_app_version() -> String {
    "0.0.1".into()
}

/// The two enforcement modes. `local_only` (the default) permits an action
/// only when an allow-list matches; `developer` short-circuits every check
/// to ALLOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    LocalOnly,
    Developer,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::LocalOnly => "local_only",
            PolicyMode::Developer => "developer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    pub base_url: String,
    pub policy_mode: PolicyMode,

    /// Concurrency cap for in-flight chat requests.
    pub max_concurrent_requests: usize,

    /// Per-request hard deadline.
    pub request_timeout_secs: u64,

    /// Per-tool soft deadline.
    pub tool_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            policy_mode: PolicyMode::LocalOnly,
            max_concurrent_requests: 32,
            request_timeout_secs: 120,
            tool_timeout_secs: 30,
        }
    }
}

// ── Policy sub-sections ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NetworkPolicy {
    /// "deny" (default) or "allow"
    pub outbound: String,
    pub allow_domains: Vec<String>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            outbound: "deny".into(),
            allow_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataSqlitePolicy {
    /// Exact absolute database paths — no globs.
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataFilesystemPolicy {
    /// Ordered path prefixes / glob patterns.
    pub allow_read: Vec<String>,
    pub allow_write: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataVectorPolicy {
    /// Collection-name glob patterns (read).
    pub allow: Vec<String>,
    /// Collection-name glob patterns (insert/update/delete).
    pub allow_write: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataPolicy {
    pub sqlite: DataSqlitePolicy,
    pub filesystem: DataFilesystemPolicy,
    pub vector: DataVectorPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsPolicy {
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Policy {
    pub network: NetworkPolicy,
    pub tools: ToolsPolicy,
    pub data: DataPolicy,
}

// ── Models ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub id: String,

    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_context_window() -> u32 {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelsConfig {
    pub backend: String,
    pub base_url: String,
    pub default: String,
    pub map: HashMap<String, ModelEntry>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".into(),
            base_url: "http://localhost:11434".into(),
            default: String::new(),
            map: HashMap::new(),
        }
    }
}

// ── Per-tool config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub read_only: bool,
    pub max_rows: Option<usize>,
    pub max_bytes: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool_type: "builtin".into(),
            read_only: false,
            max_rows: None,
            max_bytes: None,
        }
    }
}

// ── Audit ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    pub path: String,
    pub redact_prompt: bool,
    pub redact_tool_outputs: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "./audit.jsonl".into(),
            redact_prompt: false,
            redact_tool_outputs: false,
        }
    }
}

// ── Embedding + Vector DB config ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EmbeddingConfig {
    pub backend: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".into(),
            model: "nomic-embed-text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VectorConfig {
    pub backend: String,
    pub path: String,
    pub default_top_k: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "file".into(),
            path: ".domekit/vector_db".into(),
            default_top_k: 10,
        }
    }
}

// ── Root manifest ───────────────────────────────────────────────────

/// The root manifest structure. Maps directly to `domekit.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub app: AppInfo,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub policy: Policy,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_db: VectorConfig,
}

impl Manifest {
    /// Load and validate a manifest from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ManifestError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate a manifest from a YAML string.
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(raw).map_err(|err| {
            match err.location() {
                Some(loc) => ManifestError::Parse {
                    line: loc.line(),
                    column: loc.column(),
                    message: err.to_string(),
                },
                None => ManifestError::Invalid(err.to_string()),
            }
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural validation beyond what serde enforces.
    fn validate(&self) -> Result<(), ManifestError> {
        for entry in &self.policy.data.sqlite.allow {
            if entry.contains(['*', '?', '[']) {
                return Err(ManifestError::Invalid(format!(
                    "policy.data.sqlite.allow entries must be exact paths, \
                     got glob pattern: {entry}"
                )));
            }
        }
        match self.policy.network.outbound.as_str() {
            "deny" | "allow" => {}
            other => {
                return Err(ManifestError::Invalid(format!(
                    "policy.network.outbound must be \"deny\" or \"allow\", got: {other}"
                )));
            }
        }
        Ok(())
    }

    /// The default model: manifest `models.default`, or the requested name.
    pub fn resolve_model<'a>(&'a self, requested: &'a str) -> &'a str {
        if self.models.default.is_empty() {
            requested
        } else {
            &self.models.default
        }
    }

    /// Resource limits for the built-in tools, with documented defaults.
    pub fn tool_limits(&self) -> ToolLimitsView {
        let sql = self.tools.get("sql_query");
        let file = self
            .tools
            .get("read_file")
            .or_else(|| self.tools.get("write_file"));
        ToolLimitsView {
            max_rows: sql.and_then(|t| t.max_rows).unwrap_or(100),
            max_bytes: file.and_then(|t| t.max_bytes).unwrap_or(1_048_576),
            default_top_k: self.vector_db.default_top_k,
        }
    }
}

/// Limits resolved from the per-tool config tables.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimitsView {
    pub max_rows: usize,
    pub max_bytes: u64,
    pub default_top_k: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_MANIFEST: &str = r#"
app:
  name: health-poc
  version: "0.2.0"
runtime:
  policy_mode: local_only
  base_url: "http://127.0.0.1:8080"
policy:
  network:
    outbound: deny
    allow_domains: ["api.weather.gov"]
  tools:
    allow: [sql_query, read_file]
  data:
    sqlite:
      allow: ["/tmp/h.db"]
    filesystem:
      allow_read: ["/app/data/"]
      allow_write: ["/app/out/**"]
    vector:
      allow: ["health_*"]
      allow_write: ["health_notes"]
models:
  backend: ollama
  default: llama3.2
  map:
    llama3.2:
      id: "llama3.2:3b"
      context_window: 131072
tools:
  sql_query:
    read_only: true
    max_rows: 50
  read_file:
    max_bytes: 65536
audit:
  path: "/tmp/audit.jsonl"
  redact_prompt: true
"#;

    #[test]
    fn parse_full_manifest() {
        let m = Manifest::parse(FULL_MANIFEST).unwrap();
        assert_eq!(m.app.name, "health-poc");
        assert_eq!(m.runtime.policy_mode, PolicyMode::LocalOnly);
        assert_eq!(m.policy.data.sqlite.allow, vec!["/tmp/h.db"]);
        assert_eq!(m.models.default, "llama3.2");
        assert_eq!(m.models.map["llama3.2"].context_window, 131072);
        assert!(m.audit.redact_prompt);

        let limits = m.tool_limits();
        assert_eq!(limits.max_rows, 50);
        assert_eq!(limits.max_bytes, 65536);
        assert_eq!(limits.default_top_k, 10);
    }

    #[test]
    fn defaults_applied() {
        let m = Manifest::parse("app:\n  name: minimal\n").unwrap();
        assert_eq!(m.app.version, "0.0.1");
        assert_eq!(m.runtime.policy_mode, PolicyMode::LocalOnly);
        assert_eq!(m.policy.network.outbound, "deny");
        assert_eq!(m.audit.path, "./audit.jsonl");
        assert_eq!(m.vector_db.default_top_k, 10);
        assert_eq!(m.runtime.request_timeout_secs, 120);
        assert_eq!(m.runtime.tool_timeout_secs, 30);
        let limits = m.tool_limits();
        assert_eq!(limits.max_rows, 100);
        assert_eq!(limits.max_bytes, 1_048_576);
    }

    #[test]
    fn unknown_field_rejected() {
        let err = Manifest::parse("app:\n  name: x\n  nme_typo: y\n").unwrap_err();
        assert!(err.to_string().contains("nme_typo") || err.to_string().contains("unknown"));
    }

    #[test]
    fn glob_in_sqlite_allow_rejected() {
        let err = Manifest::parse(
            "app:\n  name: x\npolicy:\n  data:\n    sqlite:\n      allow: [\"/tmp/*.db\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)));
        assert!(err.to_string().contains("glob"));
    }

    #[test]
    fn unrecognized_policy_mode_rejected() {
        let err =
            Manifest::parse("app:\n  name: x\nruntime:\n  policy_mode: production\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("policy_mode") || msg.contains("unknown variant"), "{msg}");
    }

    #[test]
    fn bad_outbound_rejected() {
        let err = Manifest::parse(
            "app:\n  name: x\npolicy:\n  network:\n    outbound: maybe\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("outbound"));
    }

    #[test]
    fn parse_error_is_line_anchored() {
        let err = Manifest::parse("app:\n  name: [unclosed\n").unwrap_err();
        match err {
            ManifestError::Parse { line, .. } => assert!(line >= 1),
            ManifestError::Invalid(_) => {}
            other => panic!("expected parse error, got: {other}"),
        }
    }

    #[test]
    fn load_missing_file() {
        let err = Manifest::load("/nonexistent/domekit.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("domekit.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"app:\n  name: disk-app\n").unwrap();

        let m = Manifest::load(&path).unwrap();
        assert_eq!(m.app.name, "disk-app");
    }

    #[test]
    fn resolve_model_prefers_manifest_default() {
        let m = Manifest::parse("app:\n  name: x\nmodels:\n  default: llama3.2\n").unwrap();
        assert_eq!(m.resolve_model("gpt-4o"), "llama3.2");

        let m = Manifest::parse("app:\n  name: x\n").unwrap();
        assert_eq!(m.resolve_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn developer_mode_parses() {
        let m = Manifest::parse("app:\n  name: x\nruntime:\n  policy_mode: developer\n").unwrap();
        assert_eq!(m.runtime.policy_mode, PolicyMode::Developer);
        assert_eq!(m.runtime.policy_mode.as_str(), "developer");
    }
}
