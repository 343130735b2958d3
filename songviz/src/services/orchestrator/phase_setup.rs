//! Setup phases: DOWNLOADING → CHUNKING → TRANSCRIBING
//!
//! Job-level work done once per job before any segment is scheduled.
//! Any failure abandons the job and is returned to the `process` caller.

use std::sync::Arc;
use uuid::Uuid;

use super::{cancellable, ensure_live, Orchestrator};
use crate::models::{Job, JobPhase, Segment};
use crate::services::job_tracker::Generation;
use crate::services::{with_timeout, PipelineError};
use crate::utils::audio_decoder::{decode_audio_bytes, encode_wav, DecodedAudio};

/// Everything the dispatch phase needs from setup
pub(super) struct SetupOutput {
    pub job_id: Uuid,
    pub audio: Arc<DecodedAudio>,
    pub segments: Vec<Segment>,
    pub global_transcript: String,
}

impl Orchestrator {
    pub(super) async fn phase_setup(
        &self,
        generation: &Generation,
        source_url: &str,
    ) -> Result<SetupOutput, PipelineError> {
        let job = Job::new(
            generation.id,
            source_url.to_string(),
            self.config.segment_duration_secs,
        );
        let job_id = job.job_id;
        if !self.tracker.begin_job(job).await {
            return Err(PipelineError::Cancelled);
        }

        let result = self.run_setup(generation, source_url).await;
        match &result {
            Ok((audio, segments, _)) => {
                tracing::info!(
                    %job_id,
                    generation = generation.id,
                    total_segments = segments.len(),
                    duration_secs = audio.duration_seconds,
                    "Setup complete"
                );
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!(%job_id, generation = generation.id, "Setup cancelled by reset");
            }
            Err(e) => {
                tracing::error!(%job_id, generation = generation.id, error = %e, "Setup failed");
                self.tracker.abandon_job(generation.id).await;
            }
        }

        result.map(|(audio, segments, global_transcript)| SetupOutput {
            job_id,
            audio,
            segments,
            global_transcript,
        })
    }

    async fn enter(&self, generation: &Generation, phase: JobPhase) -> Result<(), PipelineError> {
        ensure_live(generation)?;
        if self.tracker.set_phase(generation.id, phase).await {
            Ok(())
        } else {
            Err(PipelineError::Cancelled)
        }
    }

    async fn run_setup(
        &self,
        generation: &Generation,
        source_url: &str,
    ) -> Result<(Arc<DecodedAudio>, Vec<Segment>, String), PipelineError> {
        let token = &generation.token;

        // DOWNLOADING
        self.enter(generation, JobPhase::Downloading).await?;
        let bytes = cancellable(
            token,
            with_timeout("fetch", self.config.fetch_timeout, self.audio_source.fetch(source_url)),
        )
        .await?;
        tracing::debug!(generation = generation.id, size_bytes = bytes.len(), "Source fetched");

        // CHUNKING
        self.enter(generation, JobPhase::Chunking).await?;
        let audio = cancellable(token, async move {
            tokio::task::spawn_blocking(move || decode_audio_bytes(bytes))
                .await
                .map_err(|e| PipelineError::IoFailure(format!("decode task failed: {}", e)))?
                .map_err(|e| PipelineError::IoFailure(format!("{:#}", e)))
        })
        .await?;
        if audio.samples.is_empty() {
            return Err(PipelineError::IoFailure("source contains no audio".to_string()));
        }
        let audio = Arc::new(audio);

        ensure_live(generation)?;
        let segments = {
            let store = Arc::clone(&self.store);
            let audio = Arc::clone(&audio);
            let id = generation.id;
            let segment_duration = self.config.segment_duration_secs;
            tokio::task::spawn_blocking(move || store.write_chunks(id, &audio, segment_duration))
                .await
                .map_err(|e| PipelineError::IoFailure(format!("chunk task failed: {}", e)))??
        };
        if !self.tracker.set_total_segments(generation.id, segments.len()).await {
            return Err(PipelineError::Cancelled);
        }

        // TRANSCRIBING (global)
        self.enter(generation, JobPhase::Transcribing).await?;
        let wav = {
            let audio = Arc::clone(&audio);
            tokio::task::spawn_blocking(move || encode_wav(&audio.samples, audio.sample_rate))
                .await
                .map_err(|e| PipelineError::IoFailure(format!("encode task failed: {}", e)))?
                .map_err(|e| PipelineError::IoFailure(format!("{:#}", e)))?
        };
        let global_transcript = cancellable(
            token,
            with_timeout(
                "transcription",
                self.config.transcription_timeout,
                self.transcriber.transcribe(wav),
            ),
        )
        .await?
        .trim()
        .to_string();

        if !self
            .tracker
            .set_global_transcript(generation.id, global_transcript.clone())
            .await
        {
            return Err(PipelineError::Cancelled);
        }

        Ok((audio, segments, global_transcript))
    }
}
