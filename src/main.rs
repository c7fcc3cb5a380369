//! Radio server
//!
//! Plays a classical music archive as one continuous live stream. The
//! scheduler picks performances, the station buffers them as PCM and MP3,
//! and any number of listeners tune in over HTTP.

mod config;
mod config_file;
mod error;
mod http;
mod state;
mod station;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::config_file::{generate_default_config, ConfigFile};
use crate::error::{Result, ServerError};
use crate::http::create_router;
use crate::state::AppState;
use crate::station::Station;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "radio-server";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(default_value = "config.toml")]
    config: String,

    /// Write the default configuration to PATH and exit
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "config.toml"
    )]
    write_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_config {
        init_logging(&ServerConfig::default());
        generate_default_config(path).map_err(|e| ServerError::Config(e.to_string()))?;
        tracing::info!("Wrote default configuration to {}", path);
        return Ok(());
    }

    // Load configuration
    let config_path = args.config;
    let (config, load_error) = load_config(&config_path);

    init_logging(&config);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);

    let station = Station::start(&config, radio_core::system_clock())?;
    let state = Arc::new(AppState::new(config.clone(), station));

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config.socket_addr().parse().map_err(|e| {
        ServerError::Config(format!("invalid listen address {}: {}", config.socket_addr(), e))
    })?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// The configuration in `path`, or the defaults if there is no usable file
fn load_config(path: &str) -> (ServerConfig, Option<String>) {
    if !std::path::Path::new(path).exists() {
        return (ServerConfig::default(), None);
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_server_config(), None),
        Err(e) => (ServerConfig::default(), Some(e.to_string())),
    }
}

/// Resolves on ctrl-c, after telling the station and listeners to stop
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down; the scheduler stops after the current performance");
    state.shutdown();
}

/// Initialize logging with tracing
fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "radio_server=debug,radio_core={},tower_http=debug",
            config.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
