//! Event system for songviz
//!
//! Provides the shared event definitions and the `EventBus` used to fan job
//! progress out to SSE clients and other observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// songviz event types
///
/// Events are broadcast via `EventBus` and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SongvizEvent {
    /// A new job passed setup and its segments are being dispatched
    JobStarted {
        /// Job identifier
        job_id: Uuid,
        /// Generation the job runs under
        generation: u64,
        /// Audio source the job was started from
        source_url: String,
        /// Number of segments the source was split into
        total_segments: usize,
        /// When the job started
        timestamp: DateTime<Utc>,
    },

    /// Job moved to a new pipeline phase
    JobPhaseChanged {
        /// Job identifier
        job_id: Uuid,
        /// Generation the job runs under
        generation: u64,
        /// Phase before the change
        old_phase: String,
        /// Phase after the change
        new_phase: String,
        /// When the phase changed
        timestamp: DateTime<Utc>,
    },

    /// One segment finished and its result was recorded
    SegmentCompleted {
        /// Generation the segment belongs to
        generation: u64,
        /// 0-based segment index
        segment_index: usize,
        /// Caption returned by the image service
        caption: String,
        /// When the result was recorded
        timestamp: DateTime<Utc>,
    },

    /// One segment failed; siblings keep running
    SegmentFailed {
        /// Generation the segment belongs to
        generation: u64,
        /// 0-based segment index
        segment_index: usize,
        /// Pipeline stage that failed (e.g. "transcription", "image")
        stage: String,
        /// Failure description
        message: String,
        /// When the failure was recorded
        timestamp: DateTime<Utc>,
    },

    /// Tracker was reset; everything from `old_generation` is void
    JobReset {
        /// Generation that was invalidated
        old_generation: u64,
        /// Generation now current
        new_generation: u64,
        /// When the reset happened
        timestamp: DateTime<Utc>,
    },

    /// Every segment of a job either completed or was dropped
    JobDrained {
        /// Job identifier
        job_id: Uuid,
        /// Generation the job ran under
        generation: u64,
        /// Segments with a recorded result
        completed: usize,
        /// Segments that failed
        failed: usize,
        /// When the job drained
        timestamp: DateTime<Utc>,
    },
}

impl SongvizEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SongvizEvent::JobStarted { .. } => "JobStarted",
            SongvizEvent::JobPhaseChanged { .. } => "JobPhaseChanged",
            SongvizEvent::SegmentCompleted { .. } => "SegmentCompleted",
            SongvizEvent::SegmentFailed { .. } => "SegmentFailed",
            SongvizEvent::JobReset { .. } => "JobReset",
            SongvizEvent::JobDrained { .. } => "JobDrained",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use songviz_common::events::{EventBus, SongvizEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SongvizEvent::JobReset {
///     old_generation: 1,
///     new_generation: 2,
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SongvizEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SongvizEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SongvizEvent,
    ) -> Result<usize, broadcast::error::SendError<SongvizEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SongvizEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
