//! # songviz common library
//!
//! Shared code for the songviz service crates:
//! - Error and result types
//! - Event types (`SongvizEvent`) and the broadcast `EventBus`
//! - TOML configuration loading and root folder resolution
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
