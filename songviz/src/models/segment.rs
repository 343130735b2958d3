//! Segments, their results, and the progress snapshot handed to pollers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::JobPhase;

/// One time slice of the source audio
///
/// Identity is positional: `index` is both the chunk offset and the causal
/// order key used by the prompt synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// 0-based contiguous index
    pub index: usize,
    /// Start time in seconds
    pub start_secs: f64,
    /// End time in seconds (exclusive)
    pub end_secs: f64,
}

impl Segment {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Completed record for one segment
///
/// Written once per segment per generation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    /// Validated local transcript (sentinel text for instrumental sections)
    pub local_lyrics: String,
    /// False when the transcript was replaced by the sentinel
    pub lyrics_detected: bool,
    /// Synthesized image prompt
    pub prompt: String,
    /// Base64 encoded image payload
    pub image: String,
    /// Caption returned with the image
    pub caption: String,
}

/// Pipeline stage a segment failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStage {
    /// Reading the chunk back from the segment store
    Chunk,
    /// Feature extraction
    Features,
    /// Local transcription
    Transcription,
    /// Image generation
    Image,
}

impl SegmentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStage::Chunk => "chunk",
            SegmentStage::Features => "features",
            SegmentStage::Transcription => "transcription",
            SegmentStage::Image => "image",
        }
    }
}

impl fmt::Display for SegmentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a segment has no result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub stage: SegmentStage,
    pub message: String,
}

/// An earlier segment's output as seen by the prompt synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct PriorFrame {
    pub index: usize,
    pub caption: String,
    pub lyrics: String,
}

/// Point-in-time copy of the tracker state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Generation the snapshot was taken under
    pub generation: u64,
    /// Current job, if one has passed setup
    pub job_id: Option<Uuid>,
    /// Pipeline phase
    pub phase: JobPhase,
    /// Segment count of the current job, 0 when none
    pub total_segments: usize,
    /// Global transcript of the current job
    pub global_transcript: String,
    /// Completed segments (sparse)
    pub results: BTreeMap<usize, SegmentResult>,
    /// Failed segments (sparse)
    pub failures: BTreeMap<usize, SegmentFailure>,
}

impl ProgressSnapshot {
    /// Completed segments strictly before `index`, in index order
    pub fn prior_frames(&self, index: usize) -> Vec<PriorFrame> {
        self.results
            .range(..index)
            .map(|(&i, result)| PriorFrame {
                index: i,
                caption: result.caption.clone(),
                lyrics: result.local_lyrics.clone(),
            })
            .collect()
    }
}
