//! Productivity-suite plugin.
//!
//! Resources are opaque account tags (`default` is common). Each credential
//! is a refresh-token triple; the envelope injects all three so the wrapped
//! CLI can mint its own access tokens, and the probe exercises the refresh
//! grant against the auth host.

use async_trait::async_trait;
use keyhole_core::config::{Credential, PluginSection};
use keyhole_core::error::ConfigError;
use keyhole_observability::masking::{mask_email, mask_secret_hint};
use keyhole_plugin::{CredentialEnvelope, CredentialStatus, OutboundContext, Plugin};
use std::collections::HashMap;

pub const NAME: &str = "worksuite";

const TOOLS: &[&str] = &["worksuite"];

pub const DEFAULT_AUTH_HOST: &str = "https://auth.worksuite.example";

/// Suite refresh tokens are issued with this prefix.
const TOKEN_PREFIXES: &[&str] = &["wsr_"];

const REQUIRED_FIELDS: &[&str] = &["client_id", "client_secret", "refresh_token"];

const KNOWN_SETTINGS: &[&str] = &["credentials", "auth_host", "binary"];

pub struct WorksuitePlugin {
    auth_host: String,
    binary: Option<String>,
}

impl WorksuitePlugin {
    pub fn from_section(section: &PluginSection) -> Result<Self, ConfigError> {
        for key in section.settings.keys() {
            if !KNOWN_SETTINGS.contains(&key.as_str()) {
                return Err(ConfigError::Malformed(format!(
                    "plugin {NAME:?}: unknown setting {key:?}"
                )));
            }
        }
        Ok(Self {
            auth_host: section
                .setting("auth_host")
                .unwrap_or(DEFAULT_AUTH_HOST)
                .trim_end_matches('/')
                .to_string(),
            binary: section.setting("binary").map(str::to_string),
        })
    }
}

#[async_trait]
impl Plugin for WorksuitePlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn tools(&self) -> &'static [&'static str] {
        TOOLS
    }

    fn validate_entry(&self, index: usize, entry: &Credential) -> Result<(), ConfigError> {
        for field in REQUIRED_FIELDS {
            let value = entry.require(NAME, field)?;
            if value.is_empty() {
                return Err(ConfigError::Malformed(format!(
                    "plugin {NAME:?}: credential entry {index} has an empty {field:?}"
                )));
            }
        }
        Ok(())
    }

    fn envelope(&self, entry: &Credential) -> CredentialEnvelope {
        let mut env = HashMap::new();
        env.insert(
            "WORKSUITE_CLIENT_ID".to_string(),
            entry.field("client_id").unwrap_or_default().to_string(),
        );
        env.insert(
            "WORKSUITE_CLIENT_SECRET".to_string(),
            entry.field("client_secret").unwrap_or_default().to_string(),
        );
        env.insert(
            "WORKSUITE_REFRESH_TOKEN".to_string(),
            entry.field("refresh_token").unwrap_or_default().to_string(),
        );
        if let Some(account) = entry.field("account") {
            env.insert("WORKSUITE_ACCOUNT".to_string(), account.to_string());
        }
        CredentialEnvelope::new(env)
    }

    fn secret_values(&self, entry: &Credential) -> Vec<String> {
        ["client_secret", "refresh_token"]
            .iter()
            .filter_map(|f| entry.field(f))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn token_prefixes(&self) -> &'static [&'static str] {
        TOKEN_PREFIXES
    }

    fn binary_override(&self) -> Option<&str> {
        self.binary.as_deref()
    }

    async fn probe_credential(
        &self,
        credential: &Credential,
        ctx: &OutboundContext,
    ) -> CredentialStatus {
        let refresh_token = credential.field("refresh_token").unwrap_or_default();
        let masked = mask_secret_hint(refresh_token);
        let url = format!("{}/oauth/token", self.auth_host);

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", credential.field("client_id").unwrap_or_default()),
            ("client_secret", credential.field("client_secret").unwrap_or_default()),
            ("refresh_token", refresh_token),
        ];

        let response = ctx
            .http
            .post(&url)
            .form(&params)
            .timeout(ctx.http_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let mut metadata = serde_json::Map::new();
                if let Some(account) = credential.field("account") {
                    metadata.insert("account".into(), mask_email(account).into());
                }
                CredentialStatus::valid(NAME, masked, serde_json::Value::Object(metadata))
            }
            Ok(resp) => CredentialStatus::invalid(
                NAME,
                masked,
                if resp.status().is_client_error() { "INVALID_GRANT" } else { "UPSTREAM_ERROR" },
            ),
            Err(e) if e.is_timeout() => CredentialStatus::invalid(NAME, masked, "UPSTREAM_TIMEOUT"),
            Err(_) => CredentialStatus::invalid(NAME, masked, "UPSTREAM_UNAVAILABLE"),
        }
    }
}
