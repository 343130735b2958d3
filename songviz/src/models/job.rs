//! Job lifecycle state machine
//!
//! A job walks IDLE → DOWNLOADING → CHUNKING → TRANSCRIBING → DISPATCHING →
//! DRAINING → IDLE. There is no failed state for the job as a whole: setup
//! failures return it to IDLE, segment failures are recorded per segment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pipeline phase of the current job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPhase {
    /// No job running
    #[default]
    Idle,
    /// Fetching the source audio
    Downloading,
    /// Decoding and writing segment chunks
    Chunking,
    /// Transcribing the whole source for global lyrics
    Transcribing,
    /// Segment tasks scheduled and running
    Dispatching,
    /// All segments scheduled; waiting for the last ones to finish
    Draining,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "IDLE",
            JobPhase::Downloading => "DOWNLOADING",
            JobPhase::Chunking => "CHUNKING",
            JobPhase::Transcribing => "TRANSCRIBING",
            JobPhase::Dispatching => "DISPATCHING",
            JobPhase::Draining => "DRAINING",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase change record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub job_id: Uuid,
    pub old_phase: JobPhase,
    pub new_phase: JobPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// One song-processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub job_id: Uuid,

    /// Generation this job runs under; writes from other generations are void
    pub generation: u64,

    /// Where the audio came from
    pub source_url: String,

    /// Segment length in seconds
    pub segment_duration_secs: f64,

    /// Number of segments, known after chunking
    pub total_segments: usize,

    /// Transcript of the whole source, known after global transcription
    pub global_transcript: String,

    /// Current pipeline phase
    pub phase: JobPhase,

    /// Job start time
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub fn new(generation: u64, source_url: String, segment_duration_secs: f64) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            generation,
            source_url,
            segment_duration_secs,
            total_segments: 0,
            global_transcript: String::new(),
            phase: JobPhase::Idle,
            started_at: Utc::now(),
        }
    }

    /// Transition to new phase
    pub fn transition_to(&mut self, new_phase: JobPhase) -> PhaseTransition {
        let transition = PhaseTransition {
            job_id: self.job_id,
            old_phase: self.phase,
            new_phase,
            transitioned_at: Utc::now(),
        };
        self.phase = new_phase;
        transition
    }

    /// Seconds since the job started
    pub fn elapsed_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
