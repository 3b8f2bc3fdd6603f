//! ollama-relay server binary.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use ollama_relay::config::{Cli, Config, Transport};
use ollama_relay::server::routes::{build_router, AppState};
use ollama_relay::upstream::build_upstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "ollama_relay=debug,tower_http=debug"
    } else {
        "ollama_relay=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("ollama-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; resolved once, read-only from here on.
    let config = Arc::new(Config::from_cli(&cli)?);

    match config.transport {
        Transport::Http => info!(
            transport = %config.transport,
            base_url = %config.upstream.base_url,
            "Using Ollama API URL"
        ),
        Transport::Process => info!(
            transport = %config.transport,
            binary = ?config.process.binary,
            granularity = ?config.process.granularity,
            "Using Ollama CLI"
        ),
    }

    let upstream = build_upstream(&config)?;

    // Build application state.
    let state = Arc::new(AppState {
        upstream,
        config: config.clone(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
