//! Audio source fetch
//!
//! Resolves the `audio_url` of a processing request to raw bytes. Remote
//! `http(s)://` sources are downloaded. `file://` URLs and plain paths are
//! only served when a local audio folder is configured, and only for files
//! that resolve inside it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::PipelineError;

const USER_AGENT: &str = concat!("songviz/", env!("CARGO_PKG_VERSION"));

/// Raw audio provider
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Bytes behind `url`
    ///
    /// # Errors
    /// `InputError` for an empty or disallowed reference, `IoFailure` if it
    /// cannot be read.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

enum SourceLocation {
    Remote(String),
    Local(PathBuf),
}

fn locate(url: &str) -> Result<SourceLocation, PipelineError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PipelineError::InputError("audio_url is required".to_string()));
    }

    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(SourceLocation::Remote(url.to_string()));
    }
    if lower.starts_with("file://") {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| PipelineError::InputError(format!("invalid file URL: {}", e)))?;
        let path = parsed
            .to_file_path()
            .map_err(|_| PipelineError::InputError(format!("invalid file URL: {}", url)))?;
        return Ok(SourceLocation::Local(path));
    }
    if url.contains("://") {
        return Err(PipelineError::InputError(format!(
            "unsupported audio source scheme: {}",
            url
        )));
    }
    Ok(SourceLocation::Local(PathBuf::from(url)))
}

fn local_unavailable() -> PipelineError {
    PipelineError::InputError("local audio source is not available".to_string())
}

/// HTTP and local-file audio source
pub struct HttpAudioSource {
    http_client: reqwest::Client,
    /// Folder local references are confined to; `None` disables them
    local_root: Option<PathBuf>,
}

impl HttpAudioSource {
    pub fn new(local_root: Option<PathBuf>) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::IoFailure(e.to_string()))?;
        Ok(Self {
            http_client,
            local_root,
        })
    }

    /// Canonical path of `path` if it lies inside the local audio folder
    ///
    /// Missing files and files outside the folder get the same error so a
    /// caller cannot map the filesystem.
    async fn confine(&self, path: &Path) -> Result<PathBuf, PipelineError> {
        let Some(root) = &self.local_root else {
            return Err(PipelineError::InputError(
                "local audio sources are disabled".to_string(),
            ));
        };

        let root = tokio::fs::canonicalize(root).await.map_err(|e| {
            tracing::warn!(root = %root.display(), error = %e, "Local audio folder unusable");
            local_unavailable()
        })?;
        let resolved = tokio::fs::canonicalize(root.join(path)).await.map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Local audio source not resolved");
            local_unavailable()
        })?;

        if !resolved.starts_with(&root) {
            tracing::warn!(path = %path.display(), "Local audio source outside the allowed folder");
            return Err(local_unavailable());
        }
        Ok(resolved)
    }
}

#[async_trait]
impl AudioSource for HttpAudioSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        match locate(url)? {
            SourceLocation::Remote(url) => {
                tracing::debug!(url = %url, "Downloading audio source");
                let response = self
                    .http_client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| PipelineError::IoFailure(format!("download failed: {}", e)))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(PipelineError::IoFailure(format!(
                        "download of {} returned {}",
                        url, status
                    )));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| PipelineError::IoFailure(format!("download interrupted: {}", e)))?;
                Ok(bytes.to_vec())
            }
            SourceLocation::Local(path) => {
                let path = self.confine(&path).await?;
                tracing::debug!(path = %path.display(), "Reading local audio source");
                tokio::fs::read(&path).await.map_err(|e| {
                    PipelineError::IoFailure(format!("cannot read local audio source: {}", e))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_path_and_file_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.bin");
        std::fs::write(&path, b"RIFF").unwrap();

        let source = HttpAudioSource::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(source.fetch(path.to_str().unwrap()).await.unwrap(), b"RIFF");
        assert_eq!(source.fetch("song.bin").await.unwrap(), b"RIFF");

        let url = reqwest::Url::from_file_path(&path).unwrap();
        assert_eq!(source.fetch(url.as_str()).await.unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_local_sources_disabled_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.bin");
        std::fs::write(&path, b"RIFF").unwrap();

        let source = HttpAudioSource::new(None).unwrap();
        assert!(matches!(
            source.fetch(path.to_str().unwrap()).await,
            Err(PipelineError::InputError(_))
        ));
        let url = reqwest::Url::from_file_path(&path).unwrap();
        assert!(matches!(source.fetch(url.as_str()).await, Err(PipelineError::InputError(_))));
    }

    #[tokio::test]
    async fn test_local_sources_confined_to_folder() {
        let dir = TempDir::new().unwrap();
        let allowed = dir.path().join("music");
        let private = dir.path().join("private");
        std::fs::create_dir_all(&allowed).unwrap();
        std::fs::create_dir_all(&private).unwrap();
        let secret = private.join("secret.txt");
        std::fs::write(&secret, b"hidden").unwrap();

        let source = HttpAudioSource::new(Some(allowed.clone())).unwrap();

        let outside = source.fetch(secret.to_str().unwrap()).await.unwrap_err();
        let traversal = source.fetch("../private/secret.txt").await.unwrap_err();
        let missing = source
            .fetch(allowed.join("nope.wav").to_str().unwrap())
            .await
            .unwrap_err();

        // Outside, escaping and missing all look alike
        for err in [&outside, &traversal, &missing] {
            assert!(matches!(err, PipelineError::InputError(_)), "{:?}", err);
            assert_eq!(err.to_string(), outside.to_string());
            assert!(!err.to_string().contains("secret"));
        }
    }

    #[tokio::test]
    async fn test_blank_and_unknown_scheme_rejected() {
        let source = HttpAudioSource::new(None).unwrap();
        assert!(matches!(source.fetch("  ").await, Err(PipelineError::InputError(_))));
        assert!(matches!(
            source.fetch("s3://bucket/key").await,
            Err(PipelineError::InputError(_))
        ));
    }

    #[tokio::test]
    async fn test_http_download() {
        let router = Router::new()
            .route("/song", get(|| async { vec![1u8, 2, 3] }))
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let source = HttpAudioSource::new(None).unwrap();
        assert_eq!(
            source.fetch(&format!("http://{}/song", addr)).await.unwrap(),
            vec![1, 2, 3]
        );
        assert!(matches!(
            source.fetch(&format!("http://{}/gone", addr)).await,
            Err(PipelineError::IoFailure(msg)) if msg.contains("404")
        ));
    }
}
