//! HTTP API handlers for songviz
//!
//! REST endpoints for job control and polling, plus an SSE event stream.

pub mod health;
pub mod job;
pub mod settings;
pub mod sse;

pub use health::health_routes;
pub use job::job_routes;
pub use settings::settings_routes;
pub use sse::event_stream;
