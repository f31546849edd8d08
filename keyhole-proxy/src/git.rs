//! Smart-protocol git reverse proxy.
//!
//! Forwards ref advertisement, fetch, and push to the forge upstream with
//! the selected credential rewritten into the `Authorization` header. This
//! is the only code path where a credential crosses a network boundary.
//! Transfer bodies are streamed in both directions; a large fetch or push
//! never materializes in proxy memory.

use axum::body::Body;
use http::{HeaderMap, Method, Response};
use keyhole_core::error::ProxyError;
use keyhole_plugin::GitUpstream;

/// Inbound headers that are meaningful to the smart protocol. Everything
/// else, notably any sandbox-supplied `Authorization`, is dropped.
const FORWARDED_REQUEST_HEADERS: &[&str] =
    &["content-type", "accept", "user-agent", "content-encoding", "git-protocol"];

/// Upstream response headers mirrored back to the caller.
const FORWARDED_RESPONSE_HEADERS: &[&str] = &["content-type", "content-encoding"];

/// The two smart-protocol services. Anything else on the wire is rejected
/// before this type is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Parse the `service` query parameter of `info/refs`.
    pub fn from_query(service: &str) -> Option<Self> {
        match service {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            _ => None,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }
}

pub struct GitProxy {
    http: reqwest::Client,
}

impl GitProxy {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `GET {repo}.git/info/refs?service=...`: ref advertisement.
    pub async fn info_refs(
        &self,
        upstream: &GitUpstream,
        auth_header: &str,
        owner: &str,
        repo: &str,
        service: GitService,
        headers: &HeaderMap,
    ) -> Result<Response<Body>, ProxyError> {
        let url = format!(
            "{}/{owner}/{repo}.git/info/refs?service={}",
            upstream.host,
            service.endpoint()
        );
        let request = self.outbound(Method::GET, &url, auth_header, headers);
        self.send(request).await
    }

    /// `POST {repo}.git/git-upload-pack` (fetch) or `git-receive-pack`
    /// (push), with the request body streamed through.
    pub async fn service_rpc(
        &self,
        upstream: &GitUpstream,
        auth_header: &str,
        owner: &str,
        repo: &str,
        service: GitService,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response<Body>, ProxyError> {
        let url = format!("{}/{owner}/{repo}.git/{}", upstream.host, service.endpoint());
        let request = self
            .outbound(Method::POST, &url, auth_header, headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));
        self.send(request).await
    }

    /// Build the outbound request: protocol headers copied, exactly one
    /// `Authorization` header, ours.
    fn outbound(
        &self,
        method: Method,
        url: &str,
        auth_header: &str,
        headers: &HeaderMap,
    ) -> reqwest::RequestBuilder {
        tracing::debug!(%method, url, "forwarding git request");
        let mut builder = self.http.request(method, url);
        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = headers.get(*name) {
                builder = builder.header(*name, value.clone());
            }
        }
        builder.header(http::header::AUTHORIZATION, auth_header)
    }

    /// Dispatch and mirror the upstream response, streaming the body back.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response<Body>, ProxyError> {
        let upstream_response = request
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))?;

        let status = upstream_response.status();
        let mut builder = Response::builder().status(status.as_u16());
        for name in FORWARDED_RESPONSE_HEADERS {
            if let Some(value) = upstream_response.headers().get(*name) {
                builder = builder.header(*name, value.clone());
            }
        }
        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| ProxyError::Internal(e.to_string()))
    }
}
