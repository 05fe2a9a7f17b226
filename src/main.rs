use frontdoor::{
    cli::Cli,
    config::Config,
    server::{serve, shutdown_signal},
    state::AppState,
};
use std::{process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Loads configuration, binds the listener and serves until Ctrl-C.
///
/// A missing or invalid external origin stops the process before the
/// listener is bound.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli: Cli = argh::from_env();
    let config = match Config::from_sources(cli, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if !config.asset_root.is_dir() {
        warn!(
            "Asset root {} is not a directory; static requests will fail until it exists",
            config.asset_root.display()
        );
    }

    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(state.config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", state.config.listen, e);
            return ExitCode::FAILURE;
        }
    };

    let config = &state.config;
    info!("Serving static files from: {}", config.asset_root.display());
    info!(
        "Proxying {} to: {}",
        config.routes.prefixes().collect::<Vec<_>>().join(", "),
        config.upstream.base_url()
    );
    info!("Rewriting internal redirects to: {}", config.external_origin);
    info!("Server running on: http://{}", config.listen);

    if let Err(e) = serve(listener, state, shutdown_signal()).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
