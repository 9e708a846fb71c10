//! chromehand: an MCP control server that drives a real, user-owned Chromium
//! browser through the Chrome DevTools Protocol.

mod catalog;
mod dispatch;
mod errors;
mod schema;
mod server;
mod state;
mod tools;

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::server::ChromehandServer;
use crate::state::AppState;

/// Browser control server speaking MCP over stdio.
#[derive(Parser)]
#[command(name = "chromehand", version, about, long_about = None)]
struct Cli {
    /// Chromium remote-debugging port to probe, attach to, or launch on.
    #[arg(long, default_value_t = 9222)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol; all logging goes to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        port = cli.port,
        version = env!("CARGO_PKG_VERSION"),
        "chromehand starting"
    );

    let state = AppState::new(cli.port);
    let server = ChromehandServer::new(state);

    let service = server
        .serve(stdio())
        .await
        .context("failed to start the stdio transport")?;

    tokio::select! {
        result = service.waiting() => {
            result.context("stdio transport failed")?;
            info!("client disconnected; exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; exiting");
        }
    }

    Ok(())
}
