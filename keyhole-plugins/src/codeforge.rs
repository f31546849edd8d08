//! Code-forge plugin: wraps the forge CLI and proxies hosted git.
//!
//! Resources are `owner/name`, case-insensitive. Each credential carries a
//! single `token`; the envelope injects it as `CODEFORGE_TOKEN`, and the git
//! reverse proxy presents it as the password of a Basic header with a fixed
//! username.

use async_trait::async_trait;
use keyhole_core::cli::{CliRequest, CliResponse};
use keyhole_core::config::{Credential, PluginSection};
use keyhole_core::error::{ConfigError, ProxyError};
use keyhole_observability::masking::{mask_email, mask_secret_hint};
use keyhole_plugin::{
    BasicCredential, CommandOutcome, CredentialEnvelope, CredentialStatus, GitUpstream,
    OutboundContext, Plugin,
};
use std::collections::HashMap;

pub const NAME: &str = "codeforge";

const TOOLS: &[&str] = &["codeforge"];

/// Hosted git upstream.
pub const DEFAULT_HOST: &str = "https://codeforge.example";
/// REST API upstream, used by custom commands and the credential probe.
pub const DEFAULT_API_HOST: &str = "https://api.codeforge.example";

/// Fixed userinfo name for smart-protocol Basic auth; the token is the
/// password.
const GIT_USERNAME: &str = "x-access-token";

/// Forge personal tokens are issued with this prefix; bearers of it are
/// masked even when they are not in the active configuration.
const TOKEN_PREFIXES: &[&str] = &["cfp_"];

const KNOWN_SETTINGS: &[&str] = &["credentials", "host", "api_host", "binary"];

#[derive(Debug)]
pub struct CodeforgePlugin {
    host: String,
    api_host: String,
    binary: Option<String>,
}

impl CodeforgePlugin {
    pub fn from_section(section: &PluginSection) -> Result<Self, ConfigError> {
        for key in section.settings.keys() {
            if !KNOWN_SETTINGS.contains(&key.as_str()) {
                return Err(ConfigError::Malformed(format!(
                    "plugin {NAME:?}: unknown setting {key:?}"
                )));
            }
        }
        Ok(Self {
            host: section.setting("host").unwrap_or(DEFAULT_HOST).trim_end_matches('/').to_string(),
            api_host: section
                .setting("api_host")
                .unwrap_or(DEFAULT_API_HOST)
                .trim_end_matches('/')
                .to_string(),
            binary: section.setting("binary").map(str::to_string),
        })
    }

    fn token<'a>(&self, credential: &'a Credential) -> &'a str {
        credential.field("token").unwrap_or_default()
    }

    /// Split an `owner/name` resource; anything else is a caller error.
    fn split_resource(resource: &str) -> Result<(&str, &str), ProxyError> {
        match resource.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
            _ => Err(ProxyError::BadRequest(format!(
                "codeforge resource must be owner/name, got {resource:?}"
            ))),
        }
    }

    /// `discussion list`: the wrapped CLI has no discussion support, so the
    /// proxy answers from the REST API directly.
    async fn discussion_list(
        &self,
        request: &CliRequest,
        credential: &Credential,
        ctx: &OutboundContext,
    ) -> Result<CommandOutcome, ProxyError> {
        let (owner, name) = Self::split_resource(&request.resource)?;
        let url = format!("{}/repos/{owner}/{name}/discussions", self.api_host);

        let response = ctx
            .http
            .get(&url)
            .bearer_auth(self.token(credential))
            .header("accept", "application/json")
            .timeout(ctx.http_timeout)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))?;

        if status.is_success() {
            Ok(CommandOutcome::Completed(CliResponse::success(body)))
        } else {
            Ok(CommandOutcome::Completed(CliResponse::failure(
                1,
                format!("discussion list failed: {status}: {body}"),
            )))
        }
    }
}

#[async_trait]
impl Plugin for CodeforgePlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tools(&self) -> &'static [&'static str] {
        TOOLS
    }

    fn validate_entry(&self, index: usize, entry: &Credential) -> Result<(), ConfigError> {
        let token = entry.require(NAME, "token")?;
        if token.is_empty() {
            return Err(ConfigError::Malformed(format!(
                "plugin {NAME:?}: credential entry {index} has an empty token"
            )));
        }
        Ok(())
    }

    fn envelope(&self, entry: &Credential) -> CredentialEnvelope {
        let token = self.token(entry).to_string();
        let mut env = HashMap::new();
        env.insert("CODEFORGE_TOKEN".to_string(), token.clone());
        if self.host != DEFAULT_HOST {
            env.insert("CODEFORGE_HOST".to_string(), self.host.clone());
        }
        CredentialEnvelope::new(env)
            .with_basic(BasicCredential { username: GIT_USERNAME, secret: token })
    }

    fn secret_values(&self, entry: &Credential) -> Vec<String> {
        match self.token(entry) {
            "" => Vec::new(),
            token => vec![token.to_string()],
        }
    }

    fn token_prefixes(&self) -> &'static [&'static str] {
        TOKEN_PREFIXES
    }

    fn binary_override(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    fn git_upstream(&self) -> Option<GitUpstream> {
        Some(GitUpstream { host: self.host.clone(), username: GIT_USERNAME })
    }

    fn commands(&self) -> &'static [&'static str] {
        &["discussion"]
    }

    async fn run_command(
        &self,
        command: &str,
        request: &CliRequest,
        credential: &Credential,
        ctx: &OutboundContext,
    ) -> Result<CommandOutcome, ProxyError> {
        match (command, request.args.get(1).map(String::as_str)) {
            ("discussion", Some("list")) => self.discussion_list(request, credential, ctx).await,
            // Decline other discussion subcommands: a newer CLI build may
            // grow native support, so let the subprocess try.
            _ => Ok(CommandOutcome::Declined),
        }
    }

    async fn probe_credential(
        &self,
        credential: &Credential,
        ctx: &OutboundContext,
    ) -> CredentialStatus {
        let token = self.token(credential);
        let masked = mask_secret_hint(token);
        let url = format!("{}/user", self.api_host);

        let response = ctx
            .http
            .get(&url)
            .bearer_auth(token)
            .header("accept", "application/json")
            .timeout(ctx.http_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let mut metadata = serde_json::Map::new();
                if let Some(login) = body.get("login").and_then(|v| v.as_str()) {
                    metadata.insert("login".into(), login.into());
                }
                if let Some(email) = body.get("email").and_then(|v| v.as_str()) {
                    metadata.insert("email".into(), mask_email(email).into());
                }
                if let Some(label) = credential.field("label") {
                    metadata.insert("label".into(), label.into());
                }
                CredentialStatus::valid(NAME, masked, serde_json::Value::Object(metadata))
            }
            Ok(resp) => CredentialStatus::invalid(
                NAME,
                masked,
                if resp.status().as_u16() == 401 { "UNAUTHORIZED" } else { "UPSTREAM_ERROR" },
            ),
            Err(e) if e.is_timeout() => CredentialStatus::invalid(NAME, masked, "UPSTREAM_TIMEOUT"),
            Err(_) => CredentialStatus::invalid(NAME, masked, "UPSTREAM_UNAVAILABLE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhole_core::config::Config;
    use std::time::Duration;

    fn section(text: &str) -> PluginSection {
        let config = Config::from_str(text, &[NAME]).unwrap();
        config.plugins[NAME].clone()
    }

    fn cred(token: &str) -> Credential {
        section(&format!(
            r#"{{"plugins": {{"codeforge": {{"credentials": [{{"token": "{token}", "resources": ["*"]}}]}}}}}}"#
        ))
        .credentials
        .remove(0)
    }

    fn ctx(timeout_secs: u64) -> OutboundContext {
        OutboundContext {
            http: reqwest::Client::new(),
            http_timeout: Duration::from_secs(timeout_secs),
        }
    }

    // ── Configuration ────────────────────────────────────────────

    #[test]
    fn defaults_apply_without_settings() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        let upstream = plugin.git_upstream().unwrap();
        assert_eq!(upstream.host, DEFAULT_HOST);
        assert_eq!(upstream.username, "x-access-token");
        assert!(plugin.binary_override().is_none());
    }

    #[test]
    fn host_overrides_are_honored_and_trimmed() {
        let plugin = CodeforgePlugin::from_section(&section(
            r#"{"plugins": {"codeforge": {"host": "https://git.internal/", "api_host": "https://api.internal/"}}}"#,
        ))
        .unwrap();
        assert_eq!(plugin.git_upstream().unwrap().host, "https://git.internal");
        assert_eq!(plugin.api_host, "https://api.internal");
    }

    #[test]
    fn unknown_settings_are_rejected() {
        let err = CodeforgePlugin::from_section(&section(
            r#"{"plugins": {"codeforge": {"hots": "typo"}}}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("hots"));
    }

    // ── Entry validation ─────────────────────────────────────────

    #[test]
    fn entry_requires_a_nonempty_token() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        assert!(plugin.validate_entry(0, &cred("cfp_abc123def")).is_ok());
        assert!(plugin.validate_entry(0, &cred("")).is_err());
    }

    // ── Envelope ─────────────────────────────────────────────────

    #[test]
    fn envelope_injects_the_token() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        let envelope = plugin.envelope(&cred("cfp_abc123def"));
        assert_eq!(
            envelope.env().get("CODEFORGE_TOKEN").map(String::as_str),
            Some("cfp_abc123def")
        );
        // Default host needs no override variable.
        assert!(!envelope.env().contains_key("CODEFORGE_HOST"));
        assert!(envelope.basic_header().is_some());
    }

    #[test]
    fn envelope_exports_the_host_when_overridden() {
        let plugin = CodeforgePlugin::from_section(&section(
            r#"{"plugins": {"codeforge": {"host": "https://git.internal"}}}"#,
        ))
        .unwrap();
        let envelope = plugin.envelope(&cred("cfp_abc123def"));
        assert_eq!(
            envelope.env().get("CODEFORGE_HOST").map(String::as_str),
            Some("https://git.internal")
        );
    }

    #[test]
    fn secret_values_expose_the_token_for_masking() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        assert_eq!(plugin.secret_values(&cred("cfp_abc123def")), vec!["cfp_abc123def"]);
    }

    // ── Custom commands ──────────────────────────────────────────

    #[tokio::test]
    async fn unknown_discussion_subcommand_declines() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        let request: CliRequest = serde_json::from_str(
            r#"{"tool":"codeforge","args":["discussion","create","t"],"resource":"acme/widgets"}"#,
        )
        .unwrap();
        let outcome = plugin
            .run_command("discussion", &request, &cred("cfp_abc123def"), &ctx(5))
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Declined));
    }

    #[tokio::test]
    async fn discussion_list_answers_from_the_rest_api() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/discussions")
            .match_header("authorization", "Bearer cfp_abc123def")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let plugin = CodeforgePlugin::from_section(&section(&format!(
            r#"{{"plugins": {{"codeforge": {{"api_host": "{}"}}}}}}"#,
            server.url()
        )))
        .unwrap();
        let request: CliRequest = serde_json::from_str(
            r#"{"tool":"codeforge","args":["discussion","list"],"resource":"acme/widgets"}"#,
        )
        .unwrap();

        let outcome = plugin
            .run_command("discussion", &request, &cred("cfp_abc123def"), &ctx(5))
            .await
            .unwrap();
        mock.assert_async().await;
        match outcome {
            CommandOutcome::Completed(resp) => {
                assert_eq!(resp.exit_code, 0);
                assert_eq!(resp.stdout, "[]");
            }
            CommandOutcome::Declined => panic!("expected a completed response"),
        }
    }

    #[tokio::test]
    async fn discussion_list_with_a_bad_resource_is_a_bad_request() {
        let plugin = CodeforgePlugin::from_section(&section(r#"{"plugins": {"codeforge": {}}}"#)).unwrap();
        let request: CliRequest = serde_json::from_str(
            r#"{"tool":"codeforge","args":["discussion","list"],"resource":"not-a-repo"}"#,
        )
        .unwrap();
        let err = plugin
            .run_command("discussion", &request, &cred("cfp_abc123def"), &ctx(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BAD_REQUEST");
    }

    // ── Probe ────────────────────────────────────────────────────

    #[tokio::test]
    async fn probe_reports_valid_with_masked_metadata() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer cfp_abc123def")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"login": "release-bot", "email": "bots@corp.example"}"#)
            .create_async()
            .await;

        let plugin = CodeforgePlugin::from_section(&section(&format!(
            r#"{{"plugins": {{"codeforge": {{"api_host": "{}"}}}}}}"#,
            server.url()
        )))
        .unwrap();

        let status = plugin.probe_credential(&cred("cfp_abc123def"), &ctx(5)).await;
        assert!(status.valid);
        assert_eq!(status.masked_secret, "cfp_***");
        assert_eq!(status.metadata["login"], "release-bot");
        assert_eq!(status.metadata["email"], "b***s@corp.example");
    }

    #[tokio::test]
    async fn probe_reports_unauthorized_on_401() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/user").with_status(401).create_async().await;

        let plugin = CodeforgePlugin::from_section(&section(&format!(
            r#"{{"plugins": {{"codeforge": {{"api_host": "{}"}}}}}}"#,
            server.url()
        )))
        .unwrap();

        let status = plugin.probe_credential(&cred("cfp_abc123def"), &ctx(5)).await;
        assert!(!status.valid);
        assert_eq!(status.error_kind.as_deref(), Some("UNAUTHORIZED"));
        assert!(!format!("{status:?}").contains("cfp_abc123def"));
    }
}
