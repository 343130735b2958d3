//! Business logic services for songviz
//!
//! Leaf to root: segment store, feature extractor, transcriber adapter,
//! prompt synthesizer, image client, job tracker, orchestrator.

pub mod audio_source;
pub mod feature_extractor;
pub mod image_client;
pub mod job_tracker;
pub mod orchestrator;
pub mod prompt_synthesizer;
pub mod segment_store;
pub mod transcriber;

pub use audio_source::{AudioSource, HttpAudioSource};
pub use feature_extractor::{FeatureExtractor, SpectralFeatureExtractor};
pub use image_client::{GeneratedImage, ImageClient, ImageGenerator};
pub use job_tracker::{Generation, JobTracker};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StartedJob};
pub use prompt_synthesizer::{synthesize_prompt, PromptInput};
pub use segment_store::{plan_segments, SegmentStore};
pub use transcriber::{validate_transcript, SpeechClient, Transcriber, ValidatedLyrics, NO_LYRICS_SENTINEL};

use thiserror::Error;

/// Pipeline error taxonomy
///
/// Job-level setup failures stop processing before any segment is
/// scheduled; the same variants raised inside a segment task are recorded
/// against that segment only.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Missing or invalid request field
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Source fetch, decode, or chunk storage failure
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Feature extraction asked for a range outside the source
    #[error("Invalid range: {start:.3}s..{end:.3}s (source is {duration:.3}s)")]
    InvalidRange { start: f64, end: f64, duration: f64 },

    /// Upstream service not configured
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream service answered with an error or malformed payload
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// Stage exceeded its time budget
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    /// Generation was superseded while the work was in flight
    #[error("Cancelled by reset")]
    Cancelled,
}

impl PipelineError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamError(_) | PipelineError::Timeout { .. }
        )
    }
}

/// Run `fut` under a timeout, mapping expiry to [`PipelineError::Timeout`]
pub(crate) async fn with_timeout<T>(
    stage: &'static str,
    limit: std::time::Duration,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            stage,
            seconds: limit.as_secs(),
        }),
    }
}
