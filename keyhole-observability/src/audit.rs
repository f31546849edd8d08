//! Structured audit trail.
//!
//! One record per proxied command or git transfer, serialized as a JSON
//! line and emitted through `tracing` under the `keyhole::audit` target.
//! Records carry the shape of the command (tool, resource, subcommand, arg
//! count) but never credentials and never raw subprocess output; every line
//! passes through the [`SecretMasker`] before it reaches the sink.

use crate::masking::SecretMasker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether the proxy dispatched the request or rejected it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOutcome {
    Allow,
    Deny,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Unique id tying the record to server logs for the same request.
    pub request_id: String,
    /// Tool name (`codeforge`, `worksuite`) or `git` for transfers.
    pub tool: String,
    pub resource: String,
    /// First argument, or the smart-protocol service for git transfers.
    pub subcommand: Option<String>,
    /// Argument count; argument values are never recorded.
    pub argc: usize,
    pub outcome: AuditOutcome,
    /// Error kind tag when `outcome = DENY`.
    pub error_kind: Option<String>,
    /// Subprocess exit code, when a subprocess ran.
    pub exit_code: Option<i32>,
    pub duration_ms: f64,
}

impl AuditEntry {
    pub fn new(tool: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
            tool: tool.into(),
            resource: resource.into(),
            subcommand: None,
            argc: 0,
            outcome: AuditOutcome::Allow,
            error_kind: None,
            exit_code: None,
            duration_ms: 0.0,
        }
    }

    /// Record the argv shape (first argument and count), never the values.
    pub fn argv_shape(&mut self, args: &[String]) {
        self.subcommand = args.first().cloned();
        self.argc = args.len();
    }

    /// Mark the request rejected with an error kind.
    pub fn deny(&mut self, kind: impl Into<String>) {
        self.outcome = AuditOutcome::Deny;
        self.error_kind = Some(kind.into());
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Process-scoped audit sink. The only mutable shared state in the proxy
/// besides the outbound connection pool.
pub struct AuditLog {
    masker: Arc<SecretMasker>,
}

impl AuditLog {
    pub fn new(masker: Arc<SecretMasker>) -> Self {
        Self { masker }
    }

    /// Mask and emit one record.
    pub fn record(&self, entry: &AuditEntry) {
        let line = self.masker.mask(&entry.to_json_line());
        tracing::info!(target: "keyhole::audit", "{line}");
    }

    pub fn masker(&self) -> &SecretMasker {
        &self.masker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEntry {
        let mut entry = AuditEntry::new("codeforge", "acme/widgets");
        entry.argv_shape(&["issue".to_string(), "list".to_string()]);
        entry.exit_code = Some(0);
        entry.duration_ms = 12.5;
        entry
    }

    // ── Construction ─────────────────────────────────────────────

    #[test]
    fn new_sets_timestamp_and_request_id() {
        let entry = AuditEntry::new("codeforge", "acme/widgets");
        assert!(entry.timestamp.contains('T'));
        assert!(!entry.request_id.is_empty());
        assert_eq!(entry.outcome, AuditOutcome::Allow);
    }

    #[test]
    fn argv_shape_records_subcommand_and_count_only() {
        let entry = sample();
        assert_eq!(entry.subcommand.as_deref(), Some("issue"));
        assert_eq!(entry.argc, 2);
    }

    #[test]
    fn deny_sets_outcome_and_kind() {
        let mut entry = sample();
        entry.deny("NO_CREDENTIAL");
        assert_eq!(entry.outcome, AuditOutcome::Deny);
        assert_eq!(entry.error_kind.as_deref(), Some("NO_CREDENTIAL"));
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn json_line_round_trips() {
        let entry = sample();
        let parsed: AuditEntry = serde_json::from_str(&entry.to_json_line()).unwrap();
        assert_eq!(parsed.tool, "codeforge");
        assert_eq!(parsed.resource, "acme/widgets");
        assert_eq!(parsed.exit_code, Some(0));
    }

    #[test]
    fn outcome_serializes_uppercase() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["outcome"], "ALLOW");
    }

    // ── Masking discipline ───────────────────────────────────────

    #[test]
    fn recorded_lines_never_contain_configured_secrets() {
        let masker = Arc::new(SecretMasker::new(vec!["T1".into()], &[]));
        let log = AuditLog::new(Arc::clone(&masker));

        // A resource that (wrongly) embeds a secret must still come out
        // masked; the sink is the last line of defense.
        let entry = AuditEntry::new("codeforge", "acme/T1");
        let masked = log.masker().mask(&entry.to_json_line());
        assert!(!masked.contains("T1"));
        assert!(masked.contains("***"));
    }
}
