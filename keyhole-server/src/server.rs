//! Router assembly and shared request state.

use crate::handlers;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use http::{header, StatusCode};
use keyhole_core::config::Config;
use keyhole_core::error::ProxyError;
use keyhole_observability::{AuditLog, SecretMasker};
use keyhole_plugin::{OutboundContext, PluginRegistry};
use keyhole_proxy::{Executor, GitProxy};
use std::sync::Arc;

/// Shared state for every handler. Everything here is either immutable
/// after startup (config, registry, masker) or internally synchronized
/// (audit sink, reqwest connection pool).
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<Config>,
    pub registry: Arc<PluginRegistry>,
    pub masker: Arc<SecretMasker>,
    pub audit: Arc<AuditLog>,
    pub executor: Arc<Executor>,
    pub git: Arc<GitProxy>,
    pub outbound: OutboundContext,
}

/// Build the full request state from a loaded configuration: plugin
/// registry, process-wide masker, audit sink, outbound connection pool,
/// and subprocess executor.
pub fn build_state(config: Config) -> anyhow::Result<ProxyState> {
    let registry = keyhole_plugins::build_registry(&config)?;

    let (secrets, prefixes) = registry.masking_feed();
    let masker = Arc::new(SecretMasker::new(secrets, &prefixes));
    let audit = Arc::new(AuditLog::new(Arc::clone(&masker)));

    // One pool for all outbound traffic. No client-level total timeout:
    // git transfers stream for as long as they need; probes and custom
    // commands set per-request deadlines from `timeouts.http`.
    let http = reqwest::Client::builder()
        .connect_timeout(config.timeouts.http)
        .build()?;

    let executor = Arc::new(Executor::new(config.timeouts.cli));
    let git = Arc::new(GitProxy::new(http.clone()));
    let outbound = OutboundContext { http, http_timeout: config.timeouts.http };

    Ok(ProxyState {
        config: Arc::new(config),
        registry: Arc::new(registry),
        masker,
        audit,
        executor,
        git,
        outbound,
    })
}

/// Build the axum router with all proxy routes.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/cli", post(handlers::cli::dispatch))
        .route("/health", get(handlers::health::health_check))
        .route("/auth/status", get(handlers::status::auth_status))
        // Smart-protocol trio; the catch-all rejects everything else under
        // a repo path (dumb protocol, large-file extensions).
        .route("/git/{owner}/{repo}/info/refs", get(handlers::git::info_refs))
        .route("/git/{owner}/{repo}/git-upload-pack", post(handlers::git::upload_pack))
        .route("/git/{owner}/{repo}/git-receive-pack", post(handlers::git::receive_pack))
        .route("/git/{owner}/{repo}/{*rest}", any(handlers::git::unsupported))
        .with_state(state)
}

/// Serialize an error as its JSON body, masked. Every error response
/// passes through here so a secret embedded in an upstream diagnostic
/// cannot leak.
pub(crate) fn error_response(masker: &SecretMasker, err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = masker.mask(&err.to_json_body());
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body),
    )
        .into_response()
}
