//! `GET /auth/status`: aggregated credential health.
//!
//! Probes every configured credential concurrently, preserving
//! configuration order in the response. Probe failures are data, not
//! errors: this endpoint answers 200 as long as the proxy itself is up.

use crate::server::ProxyState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::future::join_all;
use http::header;
use keyhole_core::config::Credential;
use keyhole_plugin::Plugin;
use serde_json::json;
use std::sync::Arc;

pub async fn auth_status(State(state): State<ProxyState>) -> Response {
    let mut probes = Vec::new();
    for handle in state.registry.iter() {
        for credential in handle.credentials() {
            let plugin: Arc<dyn Plugin> = Arc::clone(handle.plugin());
            let credential: Credential = credential.clone();
            let ctx = state.outbound.clone();
            probes.push(async move { plugin.probe_credential(&credential, &ctx).await });
        }
    }

    let statuses = join_all(probes).await;

    // Probes only report masked forms, but upstream-echoed metadata is not
    // under our control; the process-wide masker backstops this body like
    // every other response path.
    let body = state.masker.mask(&json!({ "credentials": statuses }).to_string());
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
