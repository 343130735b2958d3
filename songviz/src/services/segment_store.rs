//! Segment Store
//!
//! Splits decoded source audio into fixed-duration chunks, writes them as
//! `chunk_<index>.wav` under the store folder, and serves them back by index.
//!
//! # Partition
//! For a source of `D` seconds and segment length `S`, the store produces
//! `N = ceil(D / S)` chunks covering the source with no gap or overlap.
//! Chunks `0..N-1` hold exactly `S` seconds; the last one holds the rest.
//! Boundaries are computed in whole samples so lengths are exact.
//!
//! # Generations
//! Writing chunks for a new generation first deletes every chunk file of
//! the previous run. Reads name the generation they belong to and fail
//! once the store has moved on.

use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use super::PipelineError;
use crate::models::Segment;
use crate::utils::audio_decoder::{read_wav_file, write_wav_file, DecodedAudio};

const CHUNK_PREFIX: &str = "chunk_";

/// Compute the segment partition for `total_samples` at `sample_rate`
///
/// # Errors
/// `InputError` if the segment duration is not a positive finite number or
/// shorter than one sample.
pub fn plan_segments(
    total_samples: usize,
    sample_rate: u32,
    segment_duration_secs: f64,
) -> Result<Vec<Segment>, PipelineError> {
    if !segment_duration_secs.is_finite() || segment_duration_secs <= 0.0 {
        return Err(PipelineError::InputError(format!(
            "segment duration must be positive, got {}",
            segment_duration_secs
        )));
    }
    if sample_rate == 0 {
        return Err(PipelineError::IoFailure("source has zero sample rate".to_string()));
    }

    let samples_per_segment = (segment_duration_secs * sample_rate as f64).round() as usize;
    if samples_per_segment == 0 {
        return Err(PipelineError::InputError(format!(
            "segment duration {}s is shorter than one sample",
            segment_duration_secs
        )));
    }

    let count = total_samples.div_ceil(samples_per_segment);
    let sr = sample_rate as f64;

    Ok((0..count)
        .map(|index| {
            let start = index * samples_per_segment;
            let end = ((index + 1) * samples_per_segment).min(total_samples);
            Segment {
                index,
                start_secs: start as f64 / sr,
                end_secs: end as f64 / sr,
            }
        })
        .collect())
}

#[derive(Debug, Default)]
struct StoreState {
    generation: Option<u64>,
    segments: Vec<Segment>,
}

/// Chunk storage for the current generation
pub struct SegmentStore {
    folder: PathBuf,
    state: RwLock<StoreState>,
}

impl SegmentStore {
    /// Create a store writing chunks into `folder` (created on first write)
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Path of the chunk file for `index`
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.folder.join(format!("{}{}.wav", CHUNK_PREFIX, index))
    }

    /// Partition `audio` and persist the chunks for `generation`
    ///
    /// Blocking; call from `spawn_blocking` inside async code.
    ///
    /// # Errors
    /// `IoFailure` if the folder cannot be prepared or a chunk cannot be
    /// written; `InputError` for an invalid segment duration.
    pub fn write_chunks(
        &self,
        generation: u64,
        audio: &DecodedAudio,
        segment_duration_secs: f64,
    ) -> Result<Vec<Segment>, PipelineError> {
        let segments = plan_segments(audio.samples.len(), audio.sample_rate, segment_duration_secs)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Readers of the old generation must fail from here on
        state.generation = None;
        state.segments.clear();

        std::fs::create_dir_all(&self.folder).map_err(|e| {
            PipelineError::IoFailure(format!(
                "cannot create chunk folder {}: {}",
                self.folder.display(),
                e
            ))
        })?;
        let removed = self.remove_chunk_files()?;
        if removed > 0 {
            debug!(removed, "Removed chunks from previous run");
        }

        let samples_per_segment = (segment_duration_secs * audio.sample_rate as f64).round() as usize;
        for segment in &segments {
            let start = segment.index * samples_per_segment;
            let end = (start + samples_per_segment).min(audio.samples.len());
            let path = self.chunk_path(segment.index);
            write_wav_file(&path, &audio.samples[start..end], audio.sample_rate)
                .map_err(|e| PipelineError::IoFailure(format!("{:#}", e)))?;
        }

        state.generation = Some(generation);
        state.segments = segments.clone();

        info!(
            generation,
            chunks = segments.len(),
            folder = %self.folder.display(),
            "Chunks written"
        );

        Ok(segments)
    }

    /// Read chunk `index` written for `generation`
    ///
    /// # Errors
    /// `IoFailure` if the chunk belongs to another generation, is out of
    /// range, or cannot be read.
    pub fn read_chunk(&self, generation: u64, index: usize) -> Result<DecodedAudio, PipelineError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.generation != Some(generation) {
            return Err(PipelineError::IoFailure(format!(
                "chunk {} is not available for generation {}",
                index, generation
            )));
        }
        if index >= state.segments.len() {
            return Err(PipelineError::IoFailure(format!(
                "chunk {} out of range ({} chunks)",
                index,
                state.segments.len()
            )));
        }

        read_wav_file(&self.chunk_path(index))
            .map_err(|e| PipelineError::IoFailure(format!("{:#}", e)))
    }

    /// Segments stored for `generation`, if it is the stored one
    pub fn segments(&self, generation: u64) -> Option<Vec<Segment>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.generation == Some(generation)).then(|| state.segments.clone())
    }

    fn remove_chunk_files(&self) -> Result<usize, PipelineError> {
        let entries = std::fs::read_dir(&self.folder).map_err(|e| {
            PipelineError::IoFailure(format!("cannot list {}: {}", self.folder.display(), e))
        })?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::IoFailure(e.to_string()))?;
            let is_chunk = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(CHUNK_PREFIX))
                .unwrap_or(false);
            if is_chunk {
                std::fs::remove_file(entry.path()).map_err(|e| {
                    PipelineError::IoFailure(format!(
                        "cannot remove stale chunk {}: {}",
                        entry.path().display(),
                        e
                    ))
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
