//! Job API handlers
//!
//! POST /process_audio, GET /chunk_status, GET /job, GET /total_segments,
//! POST /reset

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{JobPhase, SegmentFailure, SegmentResult};
use crate::AppState;

/// POST /process_audio request
#[derive(Debug, Deserialize)]
pub struct ProcessAudioRequest {
    /// Missing is treated like blank and rejected with 400
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// POST /process_audio response
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessAudioResponse {
    pub job_id: Uuid,
    pub generation: u64,
    pub total_segments: usize,
    pub global_transcript: String,
}

/// GET /job response
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub generation: u64,
    pub job_id: Option<Uuid>,
    pub phase: JobPhase,
    pub total_segments: usize,
    pub completed: usize,
    /// Failed segments keyed by index
    pub failed: BTreeMap<usize, SegmentFailure>,
    pub global_transcript: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalSegmentsResponse {
    pub total_segments: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub generation: u64,
}

/// POST /process_audio
///
/// Supersedes any running job, fetches and chunks the source, transcribes
/// it once, and returns as soon as the segments are scheduled.
///
/// **Errors:**
/// - 400: blank `audio_url`, or no image endpoint configured
/// - 409: superseded by a reset while setting up
/// - 502: source could not be fetched/decoded, or global transcription failed
pub async fn process_audio(
    State(state): State<AppState>,
    Json(request): Json<ProcessAudioRequest>,
) -> ApiResult<Json<ProcessAudioResponse>> {
    let audio_url = request.audio_url.unwrap_or_default();
    let started = state.orchestrator.process(&audio_url).await?;

    Ok(Json(ProcessAudioResponse {
        job_id: started.job_id,
        generation: started.generation,
        total_segments: started.total_segments,
        global_transcript: started.global_transcript,
    }))
}

/// GET /chunk_status
///
/// Completed segments keyed by index. Segments still running or failed
/// have no entry.
pub async fn chunk_status(State(state): State<AppState>) -> Json<BTreeMap<usize, SegmentResult>> {
    Json(state.tracker().progress().await)
}

/// GET /job
pub async fn job_status(State(state): State<AppState>) -> Json<JobStatusResponse> {
    let snapshot = state.tracker().snapshot().await;

    Json(JobStatusResponse {
        generation: snapshot.generation,
        job_id: snapshot.job_id,
        phase: snapshot.phase,
        total_segments: snapshot.total_segments,
        completed: snapshot.results.len(),
        failed: snapshot.failures,
        global_transcript: snapshot.global_transcript,
    })
}

/// GET /total_segments
pub async fn total_segments(State(state): State<AppState>) -> Json<TotalSegmentsResponse> {
    Json(TotalSegmentsResponse {
        total_segments: state.tracker().total_segments().await,
    })
}

/// POST /reset
///
/// Clears all progress and invalidates in-flight work. Does not wait for
/// running segments to stop.
pub async fn reset_job(State(state): State<AppState>) -> Json<ResetResponse> {
    let generation = state.orchestrator.reset().await;
    Json(ResetResponse { generation })
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/process_audio", post(process_audio))
        .route("/chunk_status", get(chunk_status))
        .route("/job", get(job_status))
        .route("/total_segments", get(total_segments))
        .route("/reset", post(reset_job))
}
