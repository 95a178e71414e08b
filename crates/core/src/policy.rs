//! Policy decision values and the check interface.
//!
//! A decision is a pure value: verdict + the rule that produced it + a
//! human-readable reason. The engine that produces decisions lives in
//! `domekit-policy`; tools and the router only see the `PolicyCheck` trait.

use serde::{Deserialize, Serialize};

/// The two possible policy outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Which vector operation a check concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Read,
    Write,
}

/// The outcome of a single policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub verdict: Verdict,

    /// Which rule triggered the decision, e.g. "tools.allow"
    #[serde(default)]
    pub rule: String,

    /// Human-readable explanation
    #[serde(default)]
    pub reason: String,
}

impl PolicyDecision {
    pub fn allow(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn deny(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// The checks the policy engine exposes to the router and the tool sandboxes.
///
/// All checks are pure over the installed manifest snapshot. `check_network`
/// is advisory: the engine does not enforce sockets, callers do.
pub trait PolicyCheck: Send + Sync {
    /// Is this tool allowed at all?
    fn check_tool(&self, tool_name: &str) -> PolicyDecision;

    /// Is this exact SQLite database path allowed? No glob semantics.
    fn check_sqlite(&self, path: &str) -> PolicyDecision;

    /// Is reading this filesystem path allowed?
    fn check_read(&self, path: &str) -> PolicyDecision;

    /// Is writing this filesystem path allowed?
    fn check_write(&self, path: &str) -> PolicyDecision;

    /// Is outbound network to this host allowed?
    fn check_network(&self, host: &str) -> PolicyDecision;

    /// Is this vector collection allowed for the given operation?
    fn check_vector(&self, collection: &str, op: VectorOp) -> PolicyDecision;
}
