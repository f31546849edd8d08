//! The plugin capability set.
//!
//! Each built-in plugin binds one family of tools to one credential scheme:
//! it validates its config slice, derives credential envelopes, optionally
//! intercepts custom commands before subprocess execution, optionally
//! contributes a git upstream, and probes its credentials for `/auth/status`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyhole_core::cli::{CliRequest, CliResponse};
use keyhole_core::config::Credential;
use keyhole_core::error::{ConfigError, ProxyError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Material for the `Authorization: Basic` header the git reverse proxy
/// sends upstream. The username is fixed per plugin; the password is the
/// selected secret.
#[derive(Clone)]
pub struct BasicCredential {
    pub username: &'static str,
    pub secret: String,
}

impl BasicCredential {
    /// `Basic base64(username:secret)` header value.
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.secret);
        format!("Basic {}", BASE64.encode(raw))
    }
}

/// Plugin output of credential selection. The envelope never leaves the
/// proxy process; only the derived subprocess environment and the outbound
/// Authorization header do. It is deliberately not serializable, and its
/// `Debug` form redacts all values.
#[derive(Clone)]
pub struct CredentialEnvelope {
    env: HashMap<String, String>,
    basic: Option<BasicCredential>,
}

impl CredentialEnvelope {
    pub fn new(env: HashMap<String, String>) -> Self {
        Self { env, basic: None }
    }

    pub fn with_basic(mut self, basic: BasicCredential) -> Self {
        self.basic = Some(basic);
        self
    }

    /// Environment overlay for the child process. Overlay wins over the
    /// parent environment on key collisions.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Authorization header value for proxied git traffic, when the plugin
    /// provided basic-auth material.
    pub fn basic_header(&self) -> Option<String> {
        self.basic.as_ref().map(BasicCredential::header_value)
    }
}

impl std::fmt::Debug for CredentialEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.env.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("CredentialEnvelope")
            .field("env_keys", &keys)
            .field("basic", &self.basic.as_ref().map(|b| b.username))
            .finish()
    }
}

/// Git upstream capability: where smart-protocol traffic for this plugin's
/// resources is forwarded, and the fixed Basic username to use.
#[derive(Debug, Clone)]
pub struct GitUpstream {
    pub host: String,
    pub username: &'static str,
}

/// Return value of a custom-command handler. `Declined` falls through to
/// subprocess execution; anything else is final.
#[derive(Debug)]
pub enum CommandOutcome {
    Declined,
    Completed(CliResponse),
}

/// One credential's probe result for `/auth/status`. Secrets appear only in
/// masked form; identifying metadata is masked by the plugin before it gets
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub plugin: String,
    pub valid: bool,
    pub masked_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub metadata: Value,
}

impl CredentialStatus {
    pub fn valid(plugin: &str, masked_secret: String, metadata: Value) -> Self {
        Self {
            plugin: plugin.to_string(),
            valid: true,
            masked_secret,
            error_kind: None,
            metadata,
        }
    }

    pub fn invalid(plugin: &str, masked_secret: String, error_kind: impl Into<String>) -> Self {
        Self {
            plugin: plugin.to_string(),
            valid: false,
            masked_secret,
            error_kind: Some(error_kind.into()),
            metadata: Value::Object(Default::default()),
        }
    }
}

/// Shared outbound HTTP context handed to custom commands and probes: the
/// process-wide connection pool plus the configured `http` timeout.
#[derive(Clone)]
pub struct OutboundContext {
    pub http: reqwest::Client,
    pub http_timeout: Duration,
}

/// The plugin capability set. Implementations are built once from their
/// config section at startup and are immutable afterwards.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name; the config key under `plugins`.
    fn name(&self) -> &'static str;

    /// Tool binary names this plugin handles. Pairwise disjoint across
    /// plugins; verified when the registry is built.
    fn tools(&self) -> &'static [&'static str];

    /// Validate one credential entry from the config slice.
    fn validate_entry(&self, index: usize, entry: &Credential) -> Result<(), ConfigError>;

    /// Derive the envelope for a selected credential.
    fn envelope(&self, entry: &Credential) -> CredentialEnvelope;

    /// Every secret value in an entry, for the process-wide masker.
    fn secret_values(&self, entry: &Credential) -> Vec<String>;

    /// Token prefixes whose bearers are masked even when unconfigured.
    fn token_prefixes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Executable to spawn for this plugin's tools, when the deployment
    /// relocates or wraps the real CLI.
    fn binary_override(&self) -> Option<&str> {
        None
    }

    /// Git upstream capability; `None` for plugins without hosted repos.
    fn git_upstream(&self) -> Option<GitUpstream> {
        None
    }

    /// Names of custom commands this plugin may intercept (matched against
    /// `args[0]`).
    fn commands(&self) -> &'static [&'static str] {
        &[]
    }

    /// Handle a custom command, or decline and let the real CLI run.
    async fn run_command(
        &self,
        _command: &str,
        _request: &CliRequest,
        _credential: &Credential,
        _ctx: &OutboundContext,
    ) -> Result<CommandOutcome, ProxyError> {
        Ok(CommandOutcome::Declined)
    }

    /// Cheap authenticated probe of one credential for `/auth/status`.
    async fn probe_credential(
        &self,
        credential: &Credential,
        ctx: &OutboundContext,
    ) -> CredentialStatus;
}
