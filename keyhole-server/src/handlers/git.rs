//! `/git/{owner}/{repo}.git/...`: smart-protocol routes.
//!
//! Thin glue between the router and [`keyhole_proxy::GitProxy`]: resolve
//! the git-capable plugin, select the credential for `owner/name`, build
//! the Basic header from the envelope, and hand off to the streaming
//! forwarder.

use crate::server::{error_response, ProxyState};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use http::HeaderMap;
use keyhole_core::error::ProxyError;
use keyhole_observability::AuditEntry;
use keyhole_proxy::GitService;
use serde::Deserialize;
use std::time::Instant;

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    service: Option<String>,
}

pub async fn info_refs(
    State(state): State<ProxyState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    // The dumb protocol sends info/refs without a service parameter; only
    // the two smart services are proxied.
    let service = match query.service.as_deref().and_then(GitService::from_query) {
        Some(service) => service,
        None => {
            let err = ProxyError::NotSupported(
                "info/refs requires service=git-upload-pack or git-receive-pack".into(),
            );
            return reject(&state, &owner, &repo, "info/refs", err);
        }
    };
    forward(state, owner, repo, service, true, headers, Body::empty()).await
}

pub async fn upload_pack(
    State(state): State<ProxyState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    forward(state, owner, repo, GitService::UploadPack, false, headers, body).await
}

pub async fn receive_pack(
    State(state): State<ProxyState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    forward(state, owner, repo, GitService::ReceivePack, false, headers, body).await
}

/// Everything else under a repo path: dumb protocol, large-file
/// extensions, archive endpoints.
pub async fn unsupported(
    State(state): State<ProxyState>,
    Path((owner, repo, rest)): Path<(String, String, String)>,
) -> Response {
    let err = ProxyError::NotSupported(format!("git sub-path {rest:?} is not proxied"));
    reject(&state, &owner, &repo, &rest, err)
}

async fn forward(
    state: ProxyState,
    owner: String,
    repo: String,
    service: GitService,
    advertisement: bool,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let started = Instant::now();
    let name = repo_name(&repo);
    let resource = format!("{owner}/{name}");

    let mut entry = AuditEntry::new("git", &resource);
    entry.subcommand = Some(if advertisement {
        format!("info/refs {}", service.endpoint())
    } else {
        service.endpoint().to_string()
    });

    let result = async {
        let (handle, upstream) = state
            .registry
            .git_handle()
            .ok_or_else(|| ProxyError::NotSupported("no git-capable plugin configured".into()))?;
        let envelope = handle
            .envelope_for(&resource)
            .ok_or_else(|| ProxyError::NoCredential(resource.clone()))?;
        let auth_header = envelope
            .basic_header()
            .ok_or_else(|| ProxyError::Internal("plugin lacks basic-auth material".into()))?;

        if advertisement {
            state
                .git
                .info_refs(&upstream, &auth_header, &owner, name, service, &headers)
                .await
        } else {
            state
                .git
                .service_rpc(&upstream, &auth_header, &owner, name, service, &headers, body)
                .await
        }
    }
    .await;

    entry.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(response) => {
            state.audit.record(&entry);
            response
        }
        Err(err) => {
            entry.deny(err.kind());
            state.audit.record(&entry);
            error_response(&state.masker, &err)
        }
    }
}

fn reject(state: &ProxyState, owner: &str, repo: &str, what: &str, err: ProxyError) -> Response {
    let mut entry = AuditEntry::new("git", format!("{owner}/{}", repo_name(repo)));
    entry.subcommand = Some(what.to_string());
    entry.deny(err.kind());
    state.audit.record(&entry);
    error_response(&state.masker, &err)
}

fn repo_name(repo: &str) -> &str {
    repo.strip_suffix(".git").unwrap_or(repo)
}
