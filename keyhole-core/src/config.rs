//! Configuration loading for the Keyhole proxy.
//!
//! The configuration is a single JSON-with-comments document. Loading is
//! strict: the file must be readable by its owner only, every resource
//! pattern must be one of the three supported forms, and unknown plugin
//! names are fatal. The loaded [`Config`] is immutable for the lifetime of
//! the process; a restart is required to reload.

use crate::error::ConfigError;
use crate::resource::ResourcePattern;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8766;
pub const DEFAULT_CLI_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

// ── Loaded form ──────────────────────────────────────────────

/// Immutable, validated proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind port for the HTTP listener.
    pub port: u16,
    pub timeouts: Timeouts,
    /// Per-plugin sections, keyed by plugin name.
    pub plugins: BTreeMap<String, PluginSection>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Upper bound on one CLI subprocess run.
    pub cli: Duration,
    /// Upper bound on one outbound HTTP request (probes, custom commands).
    pub http: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cli: Duration::from_secs(DEFAULT_CLI_TIMEOUT_SECS),
            http: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

/// One plugin's slice of the configuration: its ordered credential list plus
/// plugin-specific settings (hosts, binary override). Settings are validated
/// by the plugin itself when the registry is built.
#[derive(Debug, Clone, Default)]
pub struct PluginSection {
    pub credentials: Vec<Credential>,
    pub settings: Map<String, Value>,
}

impl PluginSection {
    /// String-valued setting lookup.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

/// One configured credential: opaque secret fields plus the ordered resource
/// patterns it is scoped to. Order within the per-plugin list is significant
/// (first match wins).
#[derive(Debug, Clone)]
pub struct Credential {
    /// Plugin-interpreted fields (`token`, `client_id`, `label`, ...).
    pub fields: Map<String, Value>,
    /// Validated patterns, in configuration order.
    pub patterns: Vec<ResourcePattern>,
}

impl Credential {
    /// String-valued field lookup.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Field lookup for plugin-required secrets; missing or non-string
    /// values are a schema violation.
    pub fn require(&self, plugin: &str, name: &str) -> Result<&str, ConfigError> {
        self.field(name).ok_or_else(|| {
            ConfigError::Malformed(format!(
                "plugin {plugin:?}: credential entry is missing required field {name:?}"
            ))
        })
    }
}

// ── Raw (serde) form ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    port: Option<u16>,
    timeouts: Option<RawTimeouts>,
    #[serde(default)]
    plugins: BTreeMap<String, RawPluginSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimeouts {
    cli: Option<u64>,
    http: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPluginSection {
    #[serde(default)]
    credentials: Vec<RawCredential>,
    #[serde(flatten)]
    settings: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawCredential {
    resources: Vec<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

// ── Loader ───────────────────────────────────────────────────

impl Config {
    /// Load and validate the configuration at `path`. `known_plugins` is the
    /// built-in plugin name set; any other key under `plugins` is fatal.
    pub fn load(path: &Path, known_plugins: &[&str]) -> Result<Self, ConfigError> {
        check_permissions(path)?;

        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_str(&text, known_plugins)
    }

    /// Parse and validate a configuration document. Split out from
    /// [`Config::load`] so tests can bypass the filesystem.
    pub fn from_str(text: &str, known_plugins: &[&str]) -> Result<Self, ConfigError> {
        let stripped = strip_comments(text);
        let raw: RawConfig = serde_json::from_str(&stripped)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let timeouts = Timeouts {
            cli: positive_secs("timeouts.cli", raw.timeouts.as_ref().and_then(|t| t.cli), DEFAULT_CLI_TIMEOUT_SECS)?,
            http: positive_secs("timeouts.http", raw.timeouts.as_ref().and_then(|t| t.http), DEFAULT_HTTP_TIMEOUT_SECS)?,
        };

        let mut plugins = BTreeMap::new();
        for (name, section) in raw.plugins {
            if !known_plugins.contains(&name.as_str()) {
                return Err(ConfigError::UnknownPlugin(name));
            }
            plugins.insert(name.clone(), validate_section(&name, section)?);
        }

        Ok(Config {
            port: raw.port.unwrap_or(DEFAULT_PORT),
            timeouts,
            plugins,
        })
    }
}

fn positive_secs(key: &str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Malformed(format!("{key} must be positive"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(Duration::from_secs(default)),
    }
}

fn validate_section(name: &str, raw: RawPluginSection) -> Result<PluginSection, ConfigError> {
    let mut credentials = Vec::with_capacity(raw.credentials.len());
    for (index, entry) in raw.credentials.into_iter().enumerate() {
        if entry.resources.is_empty() {
            return Err(ConfigError::Malformed(format!(
                "plugin {name:?}: credential entry {index} has an empty resources list"
            )));
        }
        let patterns = entry
            .resources
            .iter()
            .map(|r| ResourcePattern::parse(r))
            .collect::<Result<Vec<_>, _>>()?;
        credentials.push(Credential { fields: entry.fields, patterns });
    }
    Ok(PluginSection { credentials, settings: raw.settings })
}

/// Fail unless the mode bits grant access to the owner only. The file holds
/// long-lived secrets; a group- or world-readable file is a deployment bug.
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(ConfigError::Permissions { path: path.to_path_buf(), mode });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

/// Strip `//` line comments and `/* */` block comments, preserving string
/// literals. Comment bytes are replaced with spaces so serde error positions
/// stay meaningful.
fn strip_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str,
        StrEscape,
        LineComment,
        BlockComment,
        BlockCommentStar,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '"' => {
                    state = State::Str;
                    out.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                    out.push_str("  ");
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    out.push_str("  ");
                }
                _ => out.push(c),
            },
            State::Str => {
                out.push(c);
                match c {
                    '\\' => state = State::StrEscape,
                    '"' => state = State::Code,
                    _ => {}
                }
            }
            State::StrEscape => {
                out.push(c);
                state = State::Str;
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' {
                    state = State::BlockCommentStar;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
            State::BlockCommentStar => {
                state = if c == '/' { State::Code } else if c == '*' { State::BlockCommentStar } else { State::BlockComment };
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &[&str] = &["codeforge", "worksuite"];

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::from_str(text, KNOWN)
    }

    // ── Defaults ─────────────────────────────────────────────────

    #[test]
    fn empty_document_gets_all_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.port, 8766);
        assert_eq!(cfg.timeouts.cli, Duration::from_secs(60));
        assert_eq!(cfg.timeouts.http, Duration::from_secs(30));
        assert!(cfg.plugins.is_empty());
    }

    #[test]
    fn explicit_port_and_timeouts_are_honored() {
        let cfg = parse(r#"{"port": 9000, "timeouts": {"cli": 5, "http": 2}}"#).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.timeouts.cli, Duration::from_secs(5));
        assert_eq!(cfg.timeouts.http, Duration::from_secs(2));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(matches!(
            parse(r#"{"timeouts": {"cli": 0}}"#),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            parse(r#"{"timeouts": {"http": 0}}"#),
            Err(ConfigError::Malformed(_))
        ));
    }

    // ── Plugins ──────────────────────────────────────────────────

    #[test]
    fn unknown_plugin_key_is_fatal() {
        let err = parse(r#"{"plugins": {"mystery": {}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlugin(ref name) if name == "mystery"));
        assert_eq!(err.kind(), "CONFIG_UNKNOWN_PLUGIN");
    }

    #[test]
    fn credential_entries_keep_configuration_order() {
        let cfg = parse(
            r#"{"plugins": {"codeforge": {"credentials": [
                {"token": "T1", "resources": ["acme/*"]},
                {"token": "T2", "resources": ["*"]}
            ]}}}"#,
        )
        .unwrap();
        let creds = &cfg.plugins["codeforge"].credentials;
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].field("token"), Some("T1"));
        assert_eq!(creds[1].field("token"), Some("T2"));
    }

    #[test]
    fn empty_resources_list_is_rejected() {
        let err = parse(
            r#"{"plugins": {"codeforge": {"credentials": [{"token": "T1", "resources": []}]}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty resources list"));
    }

    #[test]
    fn invalid_pattern_in_credentials_is_rejected() {
        let err = parse(
            r#"{"plugins": {"codeforge": {"credentials": [{"token": "T1", "resources": ["*/x"]}]}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "CONFIG_MALFORMED");
    }

    #[test]
    fn plugin_settings_are_kept_for_the_plugin_to_validate() {
        let cfg = parse(r#"{"plugins": {"codeforge": {"host": "https://git.internal"}}}"#).unwrap();
        assert_eq!(cfg.plugins["codeforge"].setting("host"), Some("https://git.internal"));
        assert_eq!(cfg.plugins["codeforge"].setting("missing"), None);
    }

    #[test]
    fn missing_required_field_surfaces_through_require() {
        let cfg = parse(
            r#"{"plugins": {"codeforge": {"credentials": [{"resources": ["*"]}]}}}"#,
        )
        .unwrap();
        let cred = &cfg.plugins["codeforge"].credentials[0];
        let err = cred.require("codeforge", "token").unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    // ── Comments ─────────────────────────────────────────────────

    #[test]
    fn line_and_block_comments_are_stripped() {
        let cfg = parse(
            "{\n  // listener\n  \"port\": 9100, /* timeouts\n  span lines */ \"timeouts\": {\"cli\": 7}\n}",
        )
        .unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.timeouts.cli, Duration::from_secs(7));
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let cfg = parse(
            r#"{"plugins": {"codeforge": {"host": "https://git.internal//mirror"}}}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.plugins["codeforge"].setting("host"),
            Some("https://git.internal//mirror")
        );
    }

    #[test]
    fn escaped_quote_inside_string_does_not_end_it() {
        let cfg = parse(r#"{"plugins": {"codeforge": {"host": "a\"//b"}}}"#).unwrap();
        assert_eq!(cfg.plugins["codeforge"].setting("host"), Some("a\"//b"));
    }

    #[test]
    fn malformed_json_reports_config_malformed() {
        let err = parse("{").unwrap_err();
        assert_eq!(err.kind(), "CONFIG_MALFORMED");
    }

    // ── File permissions (unix) ──────────────────────────────────

    #[cfg(unix)]
    mod permissions {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn write_config(mode: u32) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(b"{}").unwrap();
            let mut perms = file.as_file().metadata().unwrap().permissions();
            perms.set_mode(mode);
            file.as_file().set_permissions(perms).unwrap();
            file
        }

        #[test]
        fn owner_only_file_loads() {
            let file = write_config(0o600);
            assert!(Config::load(file.path(), KNOWN).is_ok());
        }

        #[test]
        fn group_readable_file_is_rejected() {
            let file = write_config(0o640);
            let err = Config::load(file.path(), KNOWN).unwrap_err();
            assert_eq!(err.kind(), "CONFIG_PERMISSIONS");
        }

        #[test]
        fn world_readable_file_is_rejected() {
            let file = write_config(0o604);
            let err = Config::load(file.path(), KNOWN).unwrap_err();
            assert_eq!(err.kind(), "CONFIG_PERMISSIONS");
        }

        #[test]
        fn owner_read_only_is_fine() {
            let file = write_config(0o400);
            assert!(Config::load(file.path(), KNOWN).is_ok());
        }

        #[test]
        fn missing_file_is_an_io_error() {
            let err = Config::load(std::path::Path::new("/nonexistent/keyhole.jsonc"), KNOWN)
                .unwrap_err();
            assert_eq!(err.kind(), "CONFIG_IO");
        }
    }
}
