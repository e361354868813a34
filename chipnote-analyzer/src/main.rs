//! chipnote-analyzer - melody analysis microservice
//!
//! Accepts audio uploads, runs each through the analysis pipeline on a
//! background task, and serves progress (SSE and JSON) and the final
//! quantized note sequence over HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chipnote_analyzer::config::{AnalyzerConfig, ConfigOverrides};
use chipnote_analyzer::AppState;

/// Command-line arguments for chipnote-analyzer
#[derive(Parser, Debug)]
#[command(name = "chipnote-analyzer")]
#[command(about = "Melody-to-note-sequence analysis microservice")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CHIPNOTE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long, env = "CHIPNOTE_BIND")]
    bind: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "CHIPNOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CHIPNOTE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        config_path: args.config,
        port: args.port,
        bind_address: args.bind,
        log_level: args.log_level,
    };
    let config = AnalyzerConfig::load(&overrides).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter_directive("chipnote_analyzer").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chipnote-analyzer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        hop_length = config.analysis.hop_length,
        confidence_threshold = config.analysis.confidence_threshold,
        max_upload_bytes = config.upload.max_file_size_bytes,
        "Analysis configuration"
    );

    let addr = config.listen_addr();
    let state = AppState::new(config);
    let app = chipnote_analyzer::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
