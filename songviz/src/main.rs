//! songviz - song to image-story service
//!
//! Splits a song into fixed segments, describes each one from its audio
//! features and lyrics, and asks an external image service for one frame
//! per segment. Progress is polled over HTTP or streamed over SSE.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use songviz::config::{ConfigOverrides, ServiceConfig};
use songviz::AppState;
use songviz_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line arguments for songviz
#[derive(Parser, Debug)]
#[command(name = "songviz")]
#[command(about = "Segment-chain image story generator for songs")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "SONGVIZ_CONFIG")]
    config: Option<PathBuf>,

    /// Folder for segment chunk files
    #[arg(short, long, env = "SONGVIZ_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Folder local audio files may be read from (unset: http(s) only)
    #[arg(long, env = "SONGVIZ_LOCAL_AUDIO_FOLDER")]
    local_audio_folder: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "SONGVIZ_BIND")]
    bind: Option<String>,

    /// Segment length in seconds
    #[arg(long, env = "SONGVIZ_SEGMENT_SECONDS")]
    segment_seconds: Option<f64>,

    /// Segments analyzed concurrently
    #[arg(long, env = "SONGVIZ_ANALYSIS_WORKERS")]
    analysis_workers: Option<usize>,

    /// Image generation endpoint
    #[arg(long, env = "SONGVIZ_IMAGE_ENDPOINT")]
    image_endpoint: Option<String>,

    /// Speech-to-text endpoint
    #[arg(long, env = "SONGVIZ_TRANSCRIBER_ENDPOINT")]
    transcriber_endpoint: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "SONGVIZ_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(songviz_common::config::config_file_path);
    let toml_config = songviz_common::config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let overrides = ConfigOverrides {
        root_folder: args.root_folder,
        local_audio_folder: args.local_audio_folder,
        bind_address: args.bind,
        segment_duration_secs: args.segment_seconds,
        analysis_workers: args.analysis_workers,
        image_endpoint: args.image_endpoint,
        transcriber_endpoint: args.transcriber_endpoint,
        log_level: args.log_level.clone(),
    };

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = args
        .log_level
        .unwrap_or_else(|| toml_config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", level)));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting songviz");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", config_path.display());

    let config = ServiceConfig::resolve(&overrides, &toml_config)?;

    std::fs::create_dir_all(config.chunk_folder()).with_context(|| {
        format!("Failed to create chunk folder {}", config.chunk_folder().display())
    })?;

    let event_bus = EventBus::new(256);
    let orchestrator = songviz::build_orchestrator(&config, event_bus)
        .context("Failed to initialize pipeline")?;
    let state = AppState::new(orchestrator).with_config_path(config_path);

    let app = songviz::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

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
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
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
