//! Data models for songviz
//!
//! - Job lifecycle and pipeline phases
//! - Segments and their per-generation results
//! - Per-segment musical descriptors

pub mod features;
pub mod job;
pub mod segment;

pub use features::{Features, PitchClass};
pub use job::{Job, JobPhase, PhaseTransition};
pub use segment::{
    PriorFrame, ProgressSnapshot, Segment, SegmentFailure, SegmentResult, SegmentStage,
};
