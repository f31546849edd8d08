//! `POST /cli`: the command dispatch pipeline.
//!
//! Resolve plugin, consult policy, select credential, offer the command to
//! the plugin's custom-command layer, then fall through to the subprocess
//! executor. The four steps are strictly sequential within one request.

use crate::server::{error_response, ProxyState};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keyhole_core::cli::{CliRequest, CliResponse};
use keyhole_core::error::ProxyError;
use keyhole_core::policy;
use keyhole_observability::AuditEntry;
use keyhole_plugin::CommandOutcome;
use std::time::Instant;

pub async fn dispatch(
    State(state): State<ProxyState>,
    payload: Result<Json<CliRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = ProxyError::BadRequest(rejection.body_text());
            let mut entry = AuditEntry::new("-", "-");
            entry.deny(err.kind());
            entry.duration_ms = elapsed_ms(started);
            state.audit.record(&entry);
            return error_response(&state.masker, &err);
        }
    };

    let mut entry = AuditEntry::new(&request.tool, &request.resource);
    entry.argv_shape(&request.args);

    let result = run_pipeline(&state, &request).await;
    entry.duration_ms = elapsed_ms(started);

    match result {
        Ok(mut response) => {
            entry.exit_code = Some(response.exit_code);
            state.audit.record(&entry);
            // Subprocess output may echo a credential (env dumps, verbose
            // modes); mask before it leaves the process.
            response.stdout = state.masker.mask(&response.stdout);
            response.stderr = state.masker.mask(&response.stderr);
            Json(response).into_response()
        }
        Err(err) => {
            entry.deny(err.kind());
            state.audit.record(&entry);
            error_response(&state.masker, &err)
        }
    }
}

async fn run_pipeline(
    state: &ProxyState,
    request: &CliRequest,
) -> Result<CliResponse, ProxyError> {
    if request.tool.is_empty() || request.resource.is_empty() {
        return Err(ProxyError::BadRequest("tool and resource must be non-empty".into()));
    }

    // 1. Resolve the plugin for this tool.
    let handle = state
        .registry
        .by_tool(&request.tool)
        .ok_or_else(|| ProxyError::UnknownTool(request.tool.clone()))?;

    if policy::evaluate(request) == policy::Decision::Deny {
        return Err(ProxyError::Forbidden("denied by policy".into()));
    }

    // 2. Select the credential for the resource.
    let credential = handle
        .select(&request.resource)
        .ok_or_else(|| ProxyError::NoCredential(request.resource.clone()))?;
    let plugin = handle.plugin();

    // 3. Custom-command layer: a Completed outcome is final, Declined
    //    falls through to the subprocess.
    if let Some(command) = request.subcommand() {
        if plugin.commands().contains(&command) {
            tracing::debug!(tool = %request.tool, command, "consulting custom command");
            match plugin.run_command(command, request, credential, &state.outbound).await? {
                CommandOutcome::Completed(response) => return Ok(response),
                CommandOutcome::Declined => {}
            }
        }
    }

    // 4. Run the real CLI with the envelope injected.
    let envelope = plugin.envelope(credential);
    let binary = plugin.binary_override().unwrap_or(&request.tool);
    state.executor.run(binary, &request.args, envelope.env()).await
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
