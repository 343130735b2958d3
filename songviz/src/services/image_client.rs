//! Image Client
//!
//! POSTs `{"prompt": ...}` to the configured generation endpoint and
//! expects `{"image": <base64>, "caption": ...}` back. The endpoint can be
//! changed at runtime; requests already in flight keep the old one.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use super::PipelineError;

const USER_AGENT: &str = concat!("songviz/", env!("CARGO_PKG_VERSION"));

/// Image payload plus the caption the generator produced for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Base64 encoded image
    pub image: String,
    pub caption: String,
}

/// Image generation collaborator
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image for `prompt`
    ///
    /// # Errors
    /// `UpstreamUnavailable` when no endpoint is configured, `UpstreamError`
    /// on a failed or malformed response.
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, PipelineError>;

    /// Currently configured endpoint
    fn endpoint(&self) -> Option<String>;

    /// Replace the endpoint
    ///
    /// # Errors
    /// `InputError` for a blank or non-http(s) URL.
    fn set_endpoint(&self, url: &str) -> Result<(), PipelineError>;

    fn is_configured(&self) -> bool {
        self.endpoint().is_some()
    }
}

/// Check that `url` is a usable http(s) endpoint and return it trimmed
pub fn validate_endpoint(url: &str) -> Result<String, PipelineError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PipelineError::InputError("image endpoint URL is required".to_string()));
    }

    let parsed = reqwest::Url::parse(url)
        .map_err(|e| PipelineError::InputError(format!("invalid image endpoint URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(PipelineError::InputError(format!(
            "image endpoint must be an http(s) URL, got {}",
            url
        )));
    }
    Ok(url.to_string())
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image: Option<String>,
    caption: Option<String>,
}

/// HTTP image generation client
pub struct ImageClient {
    http_client: reqwest::Client,
    endpoint: RwLock<Option<String>>,
}

impl ImageClient {
    /// Build a client; an invalid initial endpoint is rejected
    pub fn new(endpoint: Option<String>) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        let endpoint = match endpoint.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Some(validate_endpoint(url)?),
            _ => None,
        };

        Ok(Self {
            http_client,
            endpoint: RwLock::new(endpoint),
        })
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, PipelineError> {
        let endpoint = self.endpoint().ok_or_else(|| {
            PipelineError::UpstreamUnavailable("image generation endpoint not configured".to_string())
        })?;

        tracing::debug!(endpoint = %endpoint, prompt_len = prompt.len(), "Requesting image");

        let response = self
            .http_client
            .post(&endpoint)
            .json(&GenerateRequest { prompt })
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamError(format!("image request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamError(format!(
                "image service returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamError(format!("invalid image response: {}", e)))?;

        let image = parsed
            .image
            .filter(|i| !i.is_empty())
            .ok_or_else(|| PipelineError::UpstreamError("image response has no image".to_string()))?;
        let caption = parsed
            .caption
            .ok_or_else(|| PipelineError::UpstreamError("image response has no caption".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(image.as_bytes())
            .map_err(|e| PipelineError::UpstreamError(format!("image payload is not base64: {}", e)))?;

        Ok(GeneratedImage {
            image,
            caption: caption.trim().to_string(),
        })
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_endpoint(&self, url: &str) -> Result<(), PipelineError> {
        let url = validate_endpoint(url)?;
        tracing::info!(endpoint = %url, "Image endpoint configured");
        *self.endpoint.write().unwrap_or_else(PoisonError::into_inner) = Some(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/generate", addr)
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(validate_endpoint("https://gpu.example.com/generate").is_ok());
        assert_eq!(
            validate_endpoint("  http://localhost:7860/  ").unwrap(),
            "http://localhost:7860/"
        );
        for bad in ["", "   ", "ftp://host/x", "not a url", "file:///tmp/x"] {
            assert!(
                matches!(validate_endpoint(bad), Err(PipelineError::InputError(_))),
                "{:?} accepted",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_unconfigured_is_unavailable() {
        let client = ImageClient::new(None).unwrap();
        assert!(!client.is_configured());
        assert!(matches!(
            client.generate("a prompt").await,
            Err(PipelineError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_round_trip() {
        let url = serve(Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
                Json(json!({ "image": "aGVsbG8=", "caption": format!(" {} ", prompt) }))
            }),
        ))
        .await;

        let client = ImageClient::new(None).unwrap();
        client.set_endpoint(&url).unwrap();
        let image = client.generate("a red sky").await.unwrap();
        assert_eq!(image.image, "aGVsbG8=");
        assert_eq!(image.caption, "a red sky");
    }

    #[tokio::test]
    async fn test_malformed_responses_are_upstream_errors() {
        let url = serve(
            Router::new()
                .route("/generate", post(|| async { Json(json!({ "image": "aGVsbG8=" })) }))
                .route("/bad64", post(|| async { Json(json!({ "image": "%%%", "caption": "x" })) }))
                .route("/fail", post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") })),
        )
        .await;
        let base = url.trim_end_matches("/generate").to_string();

        let client = ImageClient::new(Some(url)).unwrap();
        assert!(matches!(
            client.generate("p").await,
            Err(PipelineError::UpstreamError(msg)) if msg.contains("caption")
        ));

        client.set_endpoint(&format!("{}/bad64", base)).unwrap();
        assert!(matches!(
            client.generate("p").await,
            Err(PipelineError::UpstreamError(msg)) if msg.contains("base64")
        ));

        client.set_endpoint(&format!("{}/fail", base)).unwrap();
        assert!(matches!(
            client.generate("p").await,
            Err(PipelineError::UpstreamError(msg)) if msg.contains("503")
        ));
    }

    #[test]
    fn test_invalid_initial_endpoint_rejected() {
        assert!(ImageClient::new(Some("gopher://x".to_string())).is_err());
        assert!(ImageClient::new(Some(" ".to_string())).unwrap().endpoint().is_none());
    }
}
