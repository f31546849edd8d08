pub mod plugin;
pub mod registry;

pub use plugin::{
    BasicCredential, CommandOutcome, CredentialEnvelope, CredentialStatus, GitUpstream,
    OutboundContext, Plugin,
};
pub use registry::{PluginHandle, PluginRegistry};
