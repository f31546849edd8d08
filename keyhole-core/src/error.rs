use std::path::PathBuf;
use thiserror::Error;

/// Startup-fatal configuration errors. The process exits non-zero on any of
/// these; no port is bound.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {path:?}: mode {mode:03o} grants group/world access, require owner-only")]
    Permissions { path: PathBuf, mode: u32 },

    #[error("unknown plugin {0:?} in config")]
    UnknownPlugin(String),

    #[error("config: {0}")]
    Malformed(String),

    #[error("config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::Permissions { .. } => "CONFIG_PERMISSIONS",
            ConfigError::UnknownPlugin(_) => "CONFIG_UNKNOWN_PLUGIN",
            ConfigError::Malformed(_) => "CONFIG_MALFORMED",
            ConfigError::Io { .. } => "CONFIG_IO",
        }
    }
}

/// Request-path errors surfaced to callers as JSON bodies.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no plugin handles tool {0:?}")]
    UnknownTool(String),

    #[error("no credential configured for resource {0:?}")]
    NoCredential(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable machine-readable kind tag, mirrored in response bodies and
    /// audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "BAD_REQUEST",
            ProxyError::UnknownTool(_) => "UNKNOWN_TOOL",
            ProxyError::NoCredential(_) => "NO_CREDENTIAL",
            ProxyError::NotSupported(_) => "NOT_SUPPORTED",
            ProxyError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ProxyError::Forbidden(_) => "FORBIDDEN",
            ProxyError::Internal(_) => "INTERNAL",
        }
    }

    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::BadRequest(_) => 400,
            ProxyError::UnknownTool(_) => 400,
            ProxyError::NoCredential(_) => 403,
            ProxyError::NotSupported(_) => 400,
            ProxyError::UpstreamUnavailable(_) => 502,
            ProxyError::Forbidden(_) => 403,
            ProxyError::Internal(_) => 500,
        }
    }

    /// JSON error body. Callers must run the result through the secret
    /// masker before it leaves the process.
    pub fn to_json_body(&self) -> String {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": self.status_code(),
        })
        .to_string()
    }
}
