//! songviz library interface
//!
//! Turns a song into a sequence of narrative image prompts, one per fixed
//! segment, each prompt carrying the captions of every earlier segment.
//! Exposes the pipeline services and the axum router for the binary and
//! for integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use songviz_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServiceConfig;
use crate::services::{
    HttpAudioSource, ImageClient, JobTracker, Orchestrator, PipelineError, SegmentStore,
    SpectralFeatureExtractor, SpeechClient,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job pipeline (owns the tracker and its event bus)
    pub orchestrator: Arc<Orchestrator>,
    /// TOML file the image endpoint is written back to, if any
    pub config_path: Option<PathBuf>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            config_path: None,
            startup_time: Utc::now(),
        }
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        self.orchestrator.tracker()
    }

    /// Event bus for SSE broadcasting
    pub fn event_bus(&self) -> &EventBus {
        self.tracker().event_bus()
    }
}

/// Wire the production collaborators for `config`
///
/// # Errors
/// Fails if an HTTP client cannot be built or the configured image
/// endpoint is not a valid http(s) URL.
pub fn build_orchestrator(
    config: &ServiceConfig,
    event_bus: EventBus,
) -> Result<Arc<Orchestrator>, PipelineError> {
    let tracker = Arc::new(JobTracker::new(event_bus));
    let store = Arc::new(SegmentStore::new(config.chunk_folder()));

    Ok(Arc::new(Orchestrator::new(
        tracker,
        store,
        Arc::new(HttpAudioSource::new(config.local_audio_folder.clone())?),
        Arc::new(SpectralFeatureExtractor::new()),
        Arc::new(SpeechClient::new(config.transcriber_endpoint.clone())?),
        Arc::new(ImageClient::new(config.image_endpoint.clone())?),
        config.orchestrator_config(),
    )))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
