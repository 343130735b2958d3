//! Configuration resolution for songviz
//!
//! Each setting is resolved with the priority command line / environment →
//! TOML file → compiled default. Command line and environment are merged by
//! the binary's argument parser and arrive here as [`ConfigOverrides`].

use songviz_common::config::{resolve_root_folder, TomlConfig};
use songviz_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::services::OrchestratorConfig;
use crate::utils::RetryPolicy;

pub const ROOT_FOLDER_ENV: &str = "SONGVIZ_ROOT_FOLDER";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";
pub const DEFAULT_TRANSCRIBER_ENDPOINT: &str = "http://127.0.0.1:9000/transcribe";
pub const DEFAULT_SEGMENT_SECONDS: f64 = 10.0;
pub const DEFAULT_ANALYSIS_WORKERS: usize = 1;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TRANSCRIPTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_IMAGE_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 500;
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(8);

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root_folder: Option<PathBuf>,
    pub local_audio_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub segment_duration_secs: Option<f64>,
    pub analysis_workers: Option<usize>,
    pub image_endpoint: Option<String>,
    pub transcriber_endpoint: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_address: SocketAddr,
    pub root_folder: PathBuf,
    /// Local audio files are only read from here; `None` disables them
    pub local_audio_folder: Option<PathBuf>,
    pub log_level: String,
    pub segment_duration_secs: f64,
    pub analysis_workers: usize,
    pub image_endpoint: Option<String>,
    pub transcriber_endpoint: Option<String>,
    pub fetch_timeout_secs: u64,
    pub transcription_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub image_retry_attempts: u32,
    pub retry_initial_backoff_ms: u64,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn positive_secs(key: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(Error::Config(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}

impl ServiceConfig {
    /// Merge overrides, TOML and defaults, validating every value
    ///
    /// # Errors
    /// `Error::Config` naming the offending key.
    pub fn resolve(overrides: &ConfigOverrides, toml: &TomlConfig) -> Result<Self> {
        let bind = overrides
            .bind_address
            .clone()
            .or_else(|| toml.bind_address.clone())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let bind_address: SocketAddr = bind
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("bind_address '{}' is invalid: {}", bind, e)))?;

        let segment_duration_secs = overrides
            .segment_duration_secs
            .or(toml.segment_duration_secs)
            .unwrap_or(DEFAULT_SEGMENT_SECONDS);
        if !segment_duration_secs.is_finite() || segment_duration_secs <= 0.0 {
            return Err(Error::Config(format!(
                "segment_duration_secs must be a positive number, got {}",
                segment_duration_secs
            )));
        }

        let analysis_workers = overrides
            .analysis_workers
            .or(toml.analysis_workers)
            .unwrap_or(DEFAULT_ANALYSIS_WORKERS);
        if analysis_workers == 0 {
            return Err(Error::Config("analysis_workers must be at least 1".to_string()));
        }

        let log_level = non_blank(overrides.log_level.as_deref())
            .or_else(|| non_blank(Some(toml.logging.level.as_str())))
            .unwrap_or_else(|| "info".to_string());

        let image_endpoint = non_blank(overrides.image_endpoint.as_deref())
            .or_else(|| non_blank(toml.image_endpoint.as_deref()));
        let transcriber_endpoint = non_blank(overrides.transcriber_endpoint.as_deref())
            .or_else(|| non_blank(toml.transcriber_endpoint.as_deref()))
            .or_else(|| Some(DEFAULT_TRANSCRIBER_ENDPOINT.to_string()));

        let local_audio_folder = overrides
            .local_audio_folder
            .clone()
            .or_else(|| toml.local_audio_folder.clone())
            .filter(|p| !p.as_os_str().is_empty());

        let upstream = &toml.upstream;
        let config = Self {
            bind_address,
            root_folder: resolve_root_folder(overrides.root_folder.as_deref(), ROOT_FOLDER_ENV, toml),
            local_audio_folder,
            log_level,
            segment_duration_secs,
            analysis_workers,
            image_endpoint,
            transcriber_endpoint,
            fetch_timeout_secs: positive_secs(
                "upstream.fetch_timeout_secs",
                upstream.fetch_timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            )?,
            transcription_timeout_secs: positive_secs(
                "upstream.transcription_timeout_secs",
                upstream
                    .transcription_timeout_secs
                    .unwrap_or(DEFAULT_TRANSCRIPTION_TIMEOUT_SECS),
            )?,
            image_timeout_secs: positive_secs(
                "upstream.image_timeout_secs",
                upstream.image_timeout_secs.unwrap_or(DEFAULT_IMAGE_TIMEOUT_SECS),
            )?,
            image_retry_attempts: upstream
                .image_retry_attempts
                .unwrap_or(DEFAULT_IMAGE_RETRY_ATTEMPTS),
            retry_initial_backoff_ms: upstream
                .retry_initial_backoff_ms
                .unwrap_or(DEFAULT_RETRY_INITIAL_BACKOFF_MS),
        };

        info!(
            bind_address = %config.bind_address,
            root_folder = %config.root_folder.display(),
            segment_duration_secs = config.segment_duration_secs,
            analysis_workers = config.analysis_workers,
            image_endpoint_configured = config.image_endpoint.is_some(),
            local_audio_enabled = config.local_audio_folder.is_some(),
            "Configuration resolved"
        );

        Ok(config)
    }

    /// Folder the segment store writes chunk files into
    pub fn chunk_folder(&self) -> PathBuf {
        self.root_folder.join("chunks")
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            segment_duration_secs: self.segment_duration_secs,
            analysis_workers: self.analysis_workers,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            transcription_timeout: Duration::from_secs(self.transcription_timeout_secs),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            image_retry: RetryPolicy {
                max_retries: self.image_retry_attempts,
                initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
                max_backoff: MAX_RETRY_BACKOFF,
            },
        }
    }
}

/// Persist the image endpoint into the TOML file, keeping other keys
///
/// Best-effort: failures are logged and swallowed.
pub fn persist_image_endpoint(toml_path: &std::path::Path, endpoint: &str) {
    let result = songviz_common::config::load_toml_config(toml_path).and_then(|mut config| {
        config.image_endpoint = Some(endpoint.to_string());
        songviz_common::config::write_toml_config(&config, toml_path)
    });

    match result {
        Ok(()) => info!(path = %toml_path.display(), "Image endpoint synced to TOML"),
        Err(e) => tracing::warn!(path = %toml_path.display(), error = %e, "TOML sync failed"),
    }
}
