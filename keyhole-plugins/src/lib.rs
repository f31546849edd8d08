//! Built-in plugin set.
//!
//! Two plugins ship with the proxy: `codeforge` (code-forge CLI plus hosted
//! git) and `worksuite` (productivity-suite CLI with a refresh-token
//! triple). The registry is built from the plugins that have configuration
//! present; a plugin without a config section simply does not exist at
//! runtime.

pub mod codeforge;
pub mod worksuite;

use keyhole_core::config::{Config, Credential};
use keyhole_core::error::ConfigError;
use keyhole_plugin::{Plugin, PluginRegistry};
use std::sync::Arc;

/// Names the configuration loader accepts under `plugins`.
pub const KNOWN_PLUGINS: &[&str] = &[codeforge::NAME, worksuite::NAME];

/// Instantiate every configured plugin and build the registry.
pub fn build_registry(config: &Config) -> Result<PluginRegistry, ConfigError> {
    let mut instances: Vec<(Arc<dyn Plugin>, Vec<Credential>)> = Vec::new();
    for (name, section) in &config.plugins {
        let plugin: Arc<dyn Plugin> = match name.as_str() {
            codeforge::NAME => Arc::new(codeforge::CodeforgePlugin::from_section(section)?),
            worksuite::NAME => Arc::new(worksuite::WorksuitePlugin::from_section(section)?),
            // The loader rejects unknown keys before we get here.
            other => return Err(ConfigError::UnknownPlugin(other.to_string())),
        };
        instances.push((plugin, section.credentials.clone()));
    }
    PluginRegistry::build(instances)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_only_configured_plugins() {
        let config = Config::from_str(
            r#"{"plugins": {"codeforge": {"credentials": [{"token": "cfp_t1t1t1t1", "resources": ["*"]}]}}}"#,
            KNOWN_PLUGINS,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.by_name("codeforge").is_some());
        assert!(registry.by_name("worksuite").is_none());
    }

    #[test]
    fn empty_config_builds_an_empty_registry() {
        let config = Config::from_str("{}", KNOWN_PLUGINS).unwrap();
        let registry = build_registry(&config).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn tool_names_are_disjoint_across_the_builtin_set() {
        let config = Config::from_str(
            r#"{"plugins": {
                "codeforge": {"credentials": [{"token": "cfp_t1t1t1t1", "resources": ["*"]}]},
                "worksuite": {"credentials": [{
                    "client_id": "id", "client_secret": "cs1", "refresh_token": "wsr_r1r1r1r1",
                    "resources": ["default"]
                }]}
            }}"#,
            KNOWN_PLUGINS,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_tool("codeforge").unwrap().name(), "codeforge");
        assert_eq!(registry.by_tool("worksuite").unwrap().name(), "worksuite");
    }

    #[test]
    fn masking_feed_spans_all_plugins() {
        let config = Config::from_str(
            r#"{"plugins": {
                "codeforge": {"credentials": [{"token": "cfp_t1t1t1t1", "resources": ["*"]}]},
                "worksuite": {"credentials": [{
                    "client_id": "id", "client_secret": "cs1", "refresh_token": "wsr_r1r1r1r1",
                    "resources": ["default"]
                }]}
            }}"#,
            KNOWN_PLUGINS,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        let (secrets, prefixes) = registry.masking_feed();
        assert!(secrets.contains(&"cfp_t1t1t1t1".to_string()));
        assert!(secrets.contains(&"wsr_r1r1r1r1".to_string()));
        assert!(secrets.contains(&"cs1".to_string()));
        assert!(prefixes.contains(&"cfp_"));
        assert!(prefixes.contains(&"wsr_"));
    }
}
