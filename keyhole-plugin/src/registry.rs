//! Plugin registry.
//!
//! Built once at startup from the built-in plugin set filtered to plugins
//! with configuration present, immutable thereafter. Verifies that plugin
//! tool-name sets are pairwise disjoint and that every credential entry
//! satisfies its plugin's schema.

use crate::plugin::{CredentialEnvelope, GitUpstream, Plugin};
use keyhole_core::config::Credential;
use keyhole_core::error::ConfigError;
use keyhole_core::resource::select_first_match;
use std::collections::HashMap;
use std::sync::Arc;

/// A plugin instance bound to its config slice.
pub struct PluginHandle {
    plugin: Arc<dyn Plugin>,
    credentials: Vec<Credential>,
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("plugin", &self.plugin.name())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl PluginHandle {
    pub fn name(&self) -> &'static str {
        self.plugin.name()
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Credentials in configuration order.
    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// First-match-wins credential selection for a resource.
    pub fn select(&self, resource: &str) -> Option<&Credential> {
        select_first_match(
            self.credentials.iter().enumerate(),
            |c| c.patterns.as_slice(),
            resource,
        )
        .map(|index| &self.credentials[index])
    }

    /// Select a credential and derive its envelope in one step.
    pub fn envelope_for(&self, resource: &str) -> Option<CredentialEnvelope> {
        self.select(resource).map(|cred| self.plugin.envelope(cred))
    }
}

#[derive(Debug)]
pub struct PluginRegistry {
    handles: Vec<PluginHandle>,
    by_name: HashMap<&'static str, usize>,
    by_tool: HashMap<&'static str, usize>,
}

impl PluginRegistry {
    /// Build the registry from configured plugin instances. Each entry is
    /// validated against its plugin's schema; duplicate tool claims fail
    /// the load.
    pub fn build(
        instances: Vec<(Arc<dyn Plugin>, Vec<Credential>)>,
    ) -> Result<Self, ConfigError> {
        let mut handles: Vec<PluginHandle> = Vec::with_capacity(instances.len());
        let mut by_name = HashMap::new();
        let mut by_tool: HashMap<&'static str, usize> = HashMap::new();

        for (plugin, credentials) in instances {
            for (index, entry) in credentials.iter().enumerate() {
                plugin.validate_entry(index, entry)?;
            }

            let slot = handles.len();
            if by_name.insert(plugin.name(), slot).is_some() {
                return Err(ConfigError::Malformed(format!(
                    "plugin {:?} registered twice",
                    plugin.name()
                )));
            }
            for &tool in plugin.tools() {
                if let Some(prev) = by_tool.insert(tool, slot) {
                    return Err(ConfigError::Malformed(format!(
                        "tool {tool:?} claimed by both {:?} and {:?}",
                        handles[prev].name(),
                        plugin.name()
                    )));
                }
            }

            tracing::info!(
                plugin = plugin.name(),
                credentials = credentials.len(),
                "registered plugin"
            );
            handles.push(PluginHandle { plugin, credentials });
        }

        Ok(Self { handles, by_name, by_tool })
    }

    pub fn by_name(&self, name: &str) -> Option<&PluginHandle> {
        self.by_name.get(name).map(|&i| &self.handles[i])
    }

    pub fn by_tool(&self, tool: &str) -> Option<&PluginHandle> {
        self.by_tool.get(tool).map(|&i| &self.handles[i])
    }

    /// All handles in registration order (used for health aggregation and
    /// masker construction).
    pub fn iter(&self) -> impl Iterator<Item = &PluginHandle> {
        self.handles.iter()
    }

    /// The configured plugin carrying the git capability, if any.
    pub fn git_handle(&self) -> Option<(&PluginHandle, GitUpstream)> {
        self.handles
            .iter()
            .find_map(|h| h.plugin.git_upstream().map(|up| (h, up)))
    }

    /// Every configured secret value plus every plugin token prefix, as
    /// input for the process-wide masker.
    pub fn masking_feed(&self) -> (Vec<String>, Vec<&'static str>) {
        let mut secrets = Vec::new();
        let mut prefixes = Vec::new();
        for handle in &self.handles {
            for cred in &handle.credentials {
                secrets.extend(handle.plugin.secret_values(cred));
            }
            prefixes.extend_from_slice(handle.plugin.token_prefixes());
        }
        (secrets, prefixes)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
