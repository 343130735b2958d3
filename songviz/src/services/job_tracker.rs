//! Job State Tracker
//!
//! Single owner of the progress map, the failure map, the current job and
//! the generation counter, all behind one `tokio::sync::Mutex` so pollers
//! never observe a torn state.
//!
//! Every write names the generation it was produced under. Writes from a
//! superseded generation are dropped silently; this is what keeps results
//! of work that outlived a reset out of the next run.

use chrono::Utc;
use songviz_common::events::{EventBus, SongvizEvent};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::{Job, JobPhase, ProgressSnapshot, SegmentFailure, SegmentResult};

/// Handle for one run: its id plus the token cancelled when it is superseded
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: u64,
    pub token: CancellationToken,
}

impl Generation {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct TrackerState {
    generation: u64,
    token: CancellationToken,
    job: Option<Job>,
    results: BTreeMap<usize, SegmentResult>,
    failures: BTreeMap<usize, SegmentFailure>,
}

impl TrackerState {
    /// Job of `generation`, if that generation is still current
    fn job_for(&mut self, generation: u64) -> Option<&mut Job> {
        if self.generation != generation {
            return None;
        }
        self.job.as_mut()
    }
}

pub struct JobTracker {
    state: Mutex<TrackerState>,
    event_bus: EventBus,
}

impl JobTracker {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                generation: 0,
                token: CancellationToken::new(),
                job: None,
                results: BTreeMap::new(),
                failures: BTreeMap::new(),
            }),
            event_bus,
        }
    }

    /// Clear everything, bump the generation and cancel the old one
    pub async fn reset(&self) -> Generation {
        let mut state = self.state.lock().await;

        state.token.cancel();
        let old_generation = state.generation;
        state.generation += 1;
        state.token = CancellationToken::new();
        state.job = None;
        state.results.clear();
        state.failures.clear();

        let generation = Generation {
            id: state.generation,
            token: state.token.clone(),
        };
        drop(state);

        info!(old_generation, new_generation = generation.id, "Tracker reset");
        self.event_bus.emit_lossy(SongvizEvent::JobReset {
            old_generation,
            new_generation: generation.id,
            timestamp: Utc::now(),
        });

        generation
    }

    /// Current generation handle
    pub async fn current(&self) -> Generation {
        let state = self.state.lock().await;
        Generation {
            id: state.generation,
            token: state.token.clone(),
        }
    }

    /// Install `job` as the current job; dropped if its generation is stale
    pub async fn begin_job(&self, job: Job) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != job.generation {
            debug!(generation = job.generation, "Dropping job from superseded generation");
            return false;
        }
        state.job = Some(job);
        true
    }

    /// Move the current job to `phase`
    pub async fn set_phase(&self, generation: u64, phase: JobPhase) -> bool {
        let mut state = self.state.lock().await;
        let Some(job) = state.job_for(generation) else {
            return false;
        };
        if job.phase == phase {
            return true;
        }
        let transition = job.transition_to(phase);
        drop(state);

        debug!(
            job_id = %transition.job_id,
            generation,
            from = %transition.old_phase,
            to = %transition.new_phase,
            "Job phase changed"
        );
        self.event_bus.emit_lossy(SongvizEvent::JobPhaseChanged {
            job_id: transition.job_id,
            generation,
            old_phase: transition.old_phase.to_string(),
            new_phase: transition.new_phase.to_string(),
            timestamp: transition.transitioned_at,
        });
        true
    }

    pub async fn set_total_segments(&self, generation: u64, total_segments: usize) -> bool {
        let mut state = self.state.lock().await;
        match state.job_for(generation) {
            Some(job) => {
                job.total_segments = total_segments;
                true
            }
            None => false,
        }
    }

    pub async fn set_global_transcript(&self, generation: u64, transcript: String) -> bool {
        let mut state = self.state.lock().await;
        match state.job_for(generation) {
            Some(job) => {
                job.global_transcript = transcript;
                true
            }
            None => false,
        }
    }

    /// Drop the job after a setup failure; the tracker returns to idle
    pub async fn abandon_job(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return false;
        }
        state.job = None;
        true
    }

    /// Store the result for segment `index`
    ///
    /// Returns false (and stores nothing) for a stale generation or when the
    /// segment already has a result.
    pub async fn record_result(&self, generation: u64, index: usize, result: SegmentResult) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(generation, segment = index, "Dropping result from superseded generation");
            return false;
        }
        if state.results.contains_key(&index) {
            return false;
        }

        let caption = result.caption.clone();
        state.failures.remove(&index);
        state.results.insert(index, result);
        drop(state);

        self.event_bus.emit_lossy(SongvizEvent::SegmentCompleted {
            generation,
            segment_index: index,
            caption,
            timestamp: Utc::now(),
        });
        true
    }

    /// Mark segment `index` as failed; ignored for stale generations
    pub async fn record_failure(&self, generation: u64, index: usize, failure: SegmentFailure) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.results.contains_key(&index) {
            return false;
        }
        let event = SongvizEvent::SegmentFailed {
            generation,
            segment_index: index,
            stage: failure.stage.to_string(),
            message: failure.message.clone(),
            timestamp: Utc::now(),
        };
        state.failures.insert(index, failure);
        drop(state);

        self.event_bus.emit_lossy(event);
        true
    }

    /// Close out the job once every segment has been handled
    pub async fn finish_job(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        let completed = state.results.len();
        let failed = state.failures.len();
        let Some(job) = state.job_for(generation) else {
            return false;
        };
        job.transition_to(JobPhase::Idle);
        let job_id = job.job_id;
        let elapsed = job.elapsed_seconds();
        drop(state);

        info!(%job_id, generation, completed, failed, elapsed_secs = elapsed, "Job drained");
        self.event_bus.emit_lossy(SongvizEvent::JobDrained {
            job_id,
            generation,
            completed,
            failed,
            timestamp: Utc::now(),
        });
        true
    }

    /// Consistent copy of the whole tracker state
    pub async fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().await;
        let job = state.job.as_ref();
        ProgressSnapshot {
            generation: state.generation,
            job_id: job.map(|j| j.job_id),
            phase: job.map(|j| j.phase).unwrap_or_default(),
            total_segments: job.map(|j| j.total_segments).unwrap_or(0),
            global_transcript: job.map(|j| j.global_transcript.clone()).unwrap_or_default(),
            results: state.results.clone(),
            failures: state.failures.clone(),
        }
    }

    /// Completed results only
    pub async fn progress(&self) -> BTreeMap<usize, SegmentResult> {
        self.state.lock().await.results.clone()
    }

    pub async fn total_segments(&self) -> usize {
        self.state
            .lock()
            .await
            .job
            .as_ref()
            .map(|j| j.total_segments)
            .unwrap_or(0)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentStage;
    use std::sync::Arc;

    fn tracker() -> JobTracker {
        JobTracker::new(EventBus::new(64))
    }

    fn result(caption: &str) -> SegmentResult {
        SegmentResult {
            local_lyrics: "la".to_string(),
            lyrics_detected: true,
            prompt: "p".to_string(),
            image: "aGk=".to_string(),
            caption: caption.to_string(),
        }
    }

    async fn started(tracker: &JobTracker, total: usize) -> Generation {
        let generation = tracker.reset().await;
        let job = Job::new(generation.id, "http://x/song.mp3".to_string(), 10.0);
        assert!(tracker.begin_job(job).await);
        assert!(tracker.set_total_segments(generation.id, total).await);
        generation
    }

    #[tokio::test]
    async fn test_reset_bumps_generation_and_cancels() {
        let tracker = tracker();
        let first = tracker.reset().await;
        assert_eq!(first.id, 1);
        assert!(!first.is_cancelled());

        let second = tracker.reset().await;
        assert_eq!(second.id, 2);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(tracker.current().await.id, 2);
    }

    #[tokio::test]
    async fn test_stale_writes_are_dropped() {
        let tracker = tracker();
        let old = started(&tracker, 3).await;
        assert!(tracker.record_result(old.id, 0, result("old")).await);

        let new = started(&tracker, 2).await;
        assert!(tracker.progress().await.is_empty());

        assert!(!tracker.record_result(old.id, 1, result("late")).await);
        assert!(
            !tracker
                .record_failure(
                    old.id,
                    1,
                    SegmentFailure {
                        stage: SegmentStage::Image,
                        message: "late".to_string()
                    }
                )
                .await
        );
        assert!(!tracker.set_phase(old.id, JobPhase::Draining).await);

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.generation, new.id);
        assert!(snapshot.results.is_empty());
        assert!(snapshot.failures.is_empty());
        assert_eq!(snapshot.total_segments, 2);
    }

    #[tokio::test]
    async fn test_result_written_once() {
        let tracker = tracker();
        let generation = started(&tracker, 2).await;
        assert!(tracker.record_result(generation.id, 0, result("first")).await);
        assert!(!tracker.record_result(generation.id, 0, result("second")).await);
        assert_eq!(tracker.progress().await[&0].caption, "first");
    }

    #[tokio::test]
    async fn test_reset_clears_total_segments() {
        let tracker = tracker();
        started(&tracker, 3).await;
        assert_eq!(tracker.total_segments().await, 3);

        tracker.reset().await;
        assert_eq!(tracker.total_segments().await, 0);
        assert_eq!(tracker.snapshot().await.phase, JobPhase::Idle);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let tracker = tracker();
        let mut rx = tracker.event_bus().subscribe();

        let generation = started(&tracker, 1).await;
        tracker.set_phase(generation.id, JobPhase::Dispatching).await;
        tracker.record_result(generation.id, 0, result("c")).await;
        tracker.finish_job(generation.id).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(
            kinds,
            vec!["JobReset", "JobPhaseChanged", "SegmentCompleted", "JobDrained"]
        );
        assert_eq!(tracker.snapshot().await.phase, JobPhase::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() {
        let tracker = Arc::new(tracker());
        let generation = started(&tracker, 50).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let tracker = tracker.clone();
            let id = generation.id;
            handles.push(tokio::spawn(async move {
                tracker.record_result(id, i, result(&i.to_string())).await;
                tracker.snapshot().await.results.len()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap() >= 1);
        }
        assert_eq!(tracker.progress().await.len(), 50);
    }
}
