// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Keyhole — credential-isolating proxy
//
//  Sandboxed agents speak to this process over plain HTTP; credentials
//  live only here. Commands are re-dispatched to the real CLIs with the
//  right credential injected, and smart-protocol git traffic is reverse
//  proxied with the Authorization header rewritten.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use anyhow::Context;
use clap::Parser;
use keyhole_core::config::Config;
use keyhole_server::{build_router, build_state};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "keyhole", version, about = "Keyhole — credential-isolating proxy")]
struct Cli {
    /// Path to the JSON-with-comments configuration file
    #[arg(long)]
    config: PathBuf,

    /// Override the configured bind port
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Keyhole starting");

    // ── Config (startup-fatal on permission, schema, or plugin errors) ──
    let config = Config::load(&cli.config, keyhole_plugins::KNOWN_PLUGINS)
        .map_err(|e| anyhow::anyhow!("{}: {e}", e.kind()))?;
    let port = cli.port.unwrap_or(config.port);

    // ── Registry, masker, audit sink, outbound pool ──
    let state = build_state(config)?;
    info!(
        plugins = state.registry.len(),
        secrets = state.masker.secret_count(),
        "plugin registry built"
    );

    // ── Serve. Loopback only: the proxy trusts its local network. ──
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "Keyhole is ready");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Keyhole stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
