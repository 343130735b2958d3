//! Configuration loading and root folder resolution
//!
//! The TOML file is the lowest-priority configuration tier. Service crates
//! layer command-line arguments and environment variables on top of it.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "SONGVIZ_CONFIG";

/// Contents of `songviz.toml`
///
/// Every key is optional; absent keys fall through to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder where segment chunks are written
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Folder local audio files may be read from; unset disables local paths
    #[serde(default)]
    pub local_audio_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP listen address, e.g. "127.0.0.1:5740"
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Segment length in seconds
    #[serde(default)]
    pub segment_duration_secs: Option<f64>,

    /// Segments analysed concurrently (1 serializes all work)
    #[serde(default)]
    pub analysis_workers: Option<usize>,

    /// Image generation endpoint URL
    #[serde(default)]
    pub image_endpoint: Option<String>,

    /// Speech-to-text endpoint URL
    #[serde(default)]
    pub transcriber_endpoint: Option<String>,

    /// Upstream timeouts and retry policy
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Timeouts (seconds) and retry policy for upstream services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub transcription_timeout_secs: Option<u64>,
    #[serde(default)]
    pub image_timeout_secs: Option<u64>,
    /// Extra attempts after the first failed image call
    #[serde(default)]
    pub image_retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_initial_backoff_ms: Option<u64>,
}

/// Locate the TOML config file
///
/// `SONGVIZ_CONFIG` wins; otherwise `<config dir>/songviz/songviz.toml`.
/// The returned path may not exist yet.
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::config_dir()
        .map(|d| d.join("songviz").join("songviz.toml"))
        .unwrap_or_else(|| PathBuf::from("songviz.toml"))
}

/// Load TOML config, returning defaults when the file does not exist
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No TOML config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("songviz"))
        .unwrap_or_else(|| PathBuf::from("./songviz_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.image_endpoint.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("songviz.toml");

        let config = TomlConfig {
            image_endpoint: Some("http://gpu-box:5000/generate".to_string()),
            segment_duration_secs: Some(20.0),
            ..Default::default()
        };
        write_toml_config(&config, &path).unwrap();

        let loaded = load_toml_config(&path).unwrap();
        assert_eq!(
            loaded.image_endpoint.as_deref(),
            Some("http://gpu-box:5000/generate")
        );
        assert_eq!(loaded.segment_duration_secs, Some(20.0));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "segment_duration_secs = \"ten\"").unwrap();

        match load_toml_config(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("Parse TOML failed")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };

        std::env::set_var("SONGVIZ_TEST_ROOT", "/from/env");
        assert_eq!(
            resolve_root_folder(Some(Path::new("/from/cli")), "SONGVIZ_TEST_ROOT", &toml),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            resolve_root_folder(None, "SONGVIZ_TEST_ROOT", &toml),
            PathBuf::from("/from/env")
        );

        std::env::remove_var("SONGVIZ_TEST_ROOT");
        assert_eq!(
            resolve_root_folder(None, "SONGVIZ_TEST_ROOT", &toml),
            PathBuf::from("/from/toml")
        );
    }
}
