//! Segment-chain orchestrator
//!
//! # State Progression
//! IDLE → DOWNLOADING → CHUNKING → TRANSCRIBING → DISPATCHING → DRAINING → IDLE
//!
//! # Architecture
//! - `phase_setup`: fetch, decode, chunk and global transcription. Runs
//!   inside the `process` call; a failure here aborts the job before any
//!   segment is scheduled and is returned to the caller.
//! - `phase_dispatch`: the per-segment pipeline, spawned in the background.
//!   Analysis (chunk read, features, local transcription) runs for up to
//!   `analysis_workers` segments at once; its outputs are consumed in index
//!   order by the synthesis stage (prompt, image, record), so every prompt
//!   sees the full completed prefix regardless of the worker count.
//!
//! # Cancellation
//! `reset` bumps the tracker generation and cancels its token without
//! waiting for anything. Upstream calls race against that token, and every
//! write is checked against the generation. `process` waits for the
//! previous pipeline task to wind down before scheduling new segments.

use chrono::Utc;
use songviz_common::events::SongvizEvent;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    AudioSource, FeatureExtractor, ImageGenerator, JobTracker, PipelineError, SegmentStore,
    Transcriber,
};
use crate::models::JobPhase;
use crate::services::job_tracker::Generation;
use crate::utils::RetryPolicy;

mod phase_dispatch;
mod phase_setup;

/// Tunables for one orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Segment length in seconds
    pub segment_duration_secs: f64,
    /// Segments analyzed concurrently (1 serializes all work)
    pub analysis_workers: usize,
    pub fetch_timeout: Duration,
    pub transcription_timeout: Duration,
    pub image_timeout: Duration,
    /// Retry policy for the image call
    pub image_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 10.0,
            analysis_workers: 1,
            fetch_timeout: Duration::from_secs(60),
            transcription_timeout: Duration::from_secs(120),
            image_timeout: Duration::from_secs(300),
            image_retry: RetryPolicy::default(),
        }
    }
}

/// What `process` hands back once setup succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct StartedJob {
    pub job_id: Uuid,
    pub generation: u64,
    pub total_segments: usize,
    pub global_transcript: String,
}

/// Drives jobs through setup and segment dispatch
pub struct Orchestrator {
    tracker: Arc<JobTracker>,
    store: Arc<SegmentStore>,
    audio_source: Arc<dyn AudioSource>,
    feature_extractor: Arc<dyn FeatureExtractor>,
    transcriber: Arc<dyn Transcriber>,
    image_generator: Arc<dyn ImageGenerator>,
    config: OrchestratorConfig,
    /// Background dispatch task of the latest job
    pipeline: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<JobTracker>,
        store: Arc<SegmentStore>,
        audio_source: Arc<dyn AudioSource>,
        feature_extractor: Arc<dyn FeatureExtractor>,
        transcriber: Arc<dyn Transcriber>,
        image_generator: Arc<dyn ImageGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tracker,
            store,
            audio_source,
            feature_extractor,
            transcriber,
            image_generator,
            config,
            pipeline: Mutex::new(None),
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn image_generator(&self) -> &Arc<dyn ImageGenerator> {
        &self.image_generator
    }

    /// Start a new job for `source_url`
    ///
    /// Supersedes any running job, runs setup to completion and schedules
    /// the segments in the background. Returns as soon as segments are
    /// scheduled, before any of them completes.
    ///
    /// # Errors
    /// - `InputError` for a blank URL (nothing is reset)
    /// - `UpstreamUnavailable` if no image endpoint is configured (nothing is reset)
    /// - `Cancelled` if another reset or job superseded this one during setup
    /// - any setup failure (`IoFailure`, transcription errors, `Timeout`)
    pub async fn process(self: &Arc<Self>, source_url: &str) -> Result<StartedJob, PipelineError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(PipelineError::InputError("audio_url is required".to_string()));
        }
        if !self.image_generator.is_configured() {
            return Err(PipelineError::UpstreamUnavailable(
                "image generation endpoint not configured".to_string(),
            ));
        }

        let generation = self.tracker.reset().await;

        let mut pipeline = self.pipeline.lock().await;
        if let Some(previous) = pipeline.take() {
            tracing::debug!(generation = generation.id, "Waiting for previous pipeline to wind down");
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "Previous pipeline task ended abnormally");
            }
        }
        if generation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        tracing::info!(generation = generation.id, source_url, "Starting job");

        let setup = self.phase_setup(&generation, source_url).await?;

        let started = StartedJob {
            job_id: setup.job_id,
            generation: generation.id,
            total_segments: setup.segments.len(),
            global_transcript: setup.global_transcript.clone(),
        };

        if !self.tracker.set_phase(generation.id, JobPhase::Dispatching).await {
            return Err(PipelineError::Cancelled);
        }
        self.tracker.event_bus().emit_lossy(SongvizEvent::JobStarted {
            job_id: started.job_id,
            generation: generation.id,
            source_url: source_url.to_string(),
            total_segments: started.total_segments,
            timestamp: Utc::now(),
        });

        let this = Arc::clone(self);
        *pipeline = Some(tokio::spawn(async move {
            this.phase_dispatch(generation, setup).await;
        }));

        Ok(started)
    }

    /// Invalidate the current job without waiting for in-flight work
    pub async fn reset(&self) -> u64 {
        self.tracker.reset().await.id
    }

    /// Wait until the latest pipeline task has finished
    pub async fn wait_idle(&self) {
        let handle = self.pipeline.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Pipeline task ended abnormally");
            }
        }
    }
}

/// Run `fut` unless `token` is cancelled first
pub(crate) async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result,
    }
}

/// Check `generation` before a side effect
pub(crate) fn ensure_live(generation: &Generation) -> Result<(), PipelineError> {
    if generation.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
