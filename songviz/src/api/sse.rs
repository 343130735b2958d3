//! Server-Sent Events for job progress

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every `SongvizEvent`: JobStarted, JobPhaseChanged,
/// SegmentCompleted, SegmentFailed, JobReset, JobDrained.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    songviz_common::sse::create_event_sse_stream("songviz", state.event_bus())
}
