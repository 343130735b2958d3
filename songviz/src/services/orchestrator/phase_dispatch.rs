//! Dispatch phases: DISPATCHING → DRAINING → IDLE
//!
//! Two stages per segment:
//! 1. Analysis (chunk read, features, local transcription + validity
//!    filter). No ordering dependency; up to `analysis_workers` segments
//!    run at once through `StreamExt::buffered`, which still yields them
//!    in index order.
//! 2. Synthesis (prompt, image, record). A sequential fold: segment `i`
//!    is synthesized only after `0..i` have been recorded or failed, and
//!    reads its continuity prefix from a tracker snapshot.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::{cancellable, ensure_live, phase_setup::SetupOutput, Orchestrator};
use crate::models::{Features, JobPhase, Segment, SegmentFailure, SegmentResult, SegmentStage};
use crate::services::job_tracker::Generation;
use crate::services::prompt_synthesizer::{synthesize_prompt, PromptInput};
use crate::services::transcriber::{validate_transcript, ValidatedLyrics};
use crate::services::{with_timeout, PipelineError};
use crate::utils::audio_decoder::{encode_wav, DecodedAudio};
use crate::utils::retry_with_backoff;

/// Output of the analysis stage for one segment
struct Analysis {
    features: Features,
    lyrics: ValidatedLyrics,
}

type StageResult<T> = Result<T, (SegmentStage, PipelineError)>;

impl Orchestrator {
    pub(super) async fn phase_dispatch(self: Arc<Self>, generation: Generation, setup: SetupOutput) {
        let SetupOutput {
            job_id,
            audio,
            segments,
            global_transcript,
        } = setup;
        let total_segments = segments.len();
        let workers = self.config.analysis_workers.max(1);

        tracing::info!(
            %job_id,
            generation = generation.id,
            total_segments,
            analysis_workers = workers,
            "Dispatching segments"
        );

        let this: &Orchestrator = &self;
        let live = &generation;
        let source = &audio;
        let analyses = stream::iter(segments)
            .map(move |segment| async move {
                (segment, this.analyze_segment(live, source, segment).await)
            })
            .buffered(workers);
        futures::pin_mut!(analyses);

        while let Some((segment, analysis)) = analyses.next().await {
            if generation.is_cancelled() {
                break;
            }
            if segment.index + 1 == total_segments {
                self.tracker.set_phase(generation.id, JobPhase::Draining).await;
            }

            let outcome = match analysis {
                Ok(analysis) => {
                    self.synthesize_segment(&generation, segment, &global_transcript, total_segments, analysis)
                        .await
                }
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(()) => {}
                Err((_, PipelineError::Cancelled)) => break,
                Err((stage, error)) => {
                    tracing::warn!(
                        generation = generation.id,
                        segment = segment.index,
                        stage = %stage,
                        error = %error,
                        "Segment failed"
                    );
                    self.tracker
                        .record_failure(
                            generation.id,
                            segment.index,
                            SegmentFailure {
                                stage,
                                message: error.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        if generation.is_cancelled() {
            tracing::info!(%job_id, generation = generation.id, "Dispatch stopped by reset");
        } else {
            self.tracker.finish_job(generation.id).await;
        }
    }

    /// Analysis stage: chunk read, then features and transcription together
    async fn analyze_segment(
        &self,
        generation: &Generation,
        audio: &Arc<DecodedAudio>,
        segment: Segment,
    ) -> StageResult<Analysis> {
        ensure_live(generation).map_err(|e| (SegmentStage::Chunk, e))?;

        let wav = {
            let store = Arc::clone(&self.store);
            let id = generation.id;
            tokio::task::spawn_blocking(move || {
                let chunk = store.read_chunk(id, segment.index)?;
                encode_wav(&chunk.samples, chunk.sample_rate)
                    .map_err(|e| PipelineError::IoFailure(format!("{:#}", e)))
            })
            .await
            .map_err(|e| PipelineError::IoFailure(format!("chunk task failed: {}", e)))
            .and_then(|r| r)
            .map_err(|e| (SegmentStage::Chunk, e))?
        };

        let features = self.feature_extractor.extract(
            Arc::clone(audio),
            segment.start_secs,
            segment.end_secs,
        );
        let transcript = cancellable(
            &generation.token,
            with_timeout(
                "transcription",
                self.config.transcription_timeout,
                self.transcriber.transcribe(wav),
            ),
        );
        let (features, transcript) = tokio::join!(features, transcript);

        let features = features.map_err(|e| (SegmentStage::Features, e))?;
        let raw = transcript.map_err(|e| (SegmentStage::Transcription, e))?;
        let lyrics = validate_transcript(&raw);

        tracing::debug!(
            generation = generation.id,
            segment = segment.index,
            lyrics_detected = lyrics.detected,
            tempo = features.tempo_bpm,
            key = %features.key,
            "Segment analyzed"
        );

        Ok(Analysis { features, lyrics })
    }

    /// Synthesis stage: prompt from the completed prefix, image, record
    async fn synthesize_segment(
        &self,
        generation: &Generation,
        segment: Segment,
        global_transcript: &str,
        total_segments: usize,
        analysis: Analysis,
    ) -> StageResult<()> {
        let snapshot = self.tracker.snapshot().await;
        if snapshot.generation != generation.id {
            return Err((SegmentStage::Image, PipelineError::Cancelled));
        }
        let prior = snapshot.prior_frames(segment.index);

        let prompt = synthesize_prompt(&PromptInput {
            global_transcript,
            local_lyrics: &analysis.lyrics.text,
            features: &analysis.features,
            index: segment.index,
            total_segments,
            prior: &prior,
        });

        let token = &generation.token;
        let generator = &self.image_generator;
        let image_timeout = self.config.image_timeout;
        let prompt_text = prompt.as_str();
        let image = retry_with_backoff(
            "image_generation",
            self.config.image_retry,
            token,
            PipelineError::is_retryable,
            move || {
                cancellable(
                    token,
                    with_timeout("image generation", image_timeout, generator.generate(prompt_text)),
                )
            },
        )
        .await
        .map_err(|e| (SegmentStage::Image, e))?;

        let recorded = self
            .tracker
            .record_result(
                generation.id,
                segment.index,
                SegmentResult {
                    local_lyrics: analysis.lyrics.text,
                    lyrics_detected: analysis.lyrics.detected,
                    prompt,
                    image: image.image,
                    caption: image.caption,
                },
            )
            .await;

        if recorded {
            tracing::info!(
                generation = generation.id,
                segment = segment.index,
                prior_frames = prior.len(),
                "Segment completed"
            );
        }
        Ok(())
    }
}
