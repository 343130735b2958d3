//! Transcriber Adapter
//!
//! Sends WAV audio to a speech-to-text service and screens the answer.
//! Speech models emit glyph runs on silent or instrumental audio, so a
//! transcript survives only if every character (lower-cased) is a latin
//! letter, a digit, or one of `. , ? ! '` and space. Anything else is
//! replaced by [`NO_LYRICS_SENTINEL`].

use async_trait::async_trait;
use serde::Deserialize;

use super::PipelineError;

/// Lyrics text used for sections with no plausible speech
pub const NO_LYRICS_SENTINEL: &str = "no lyrics in this section";

const USER_AGENT: &str = concat!("songviz/", env!("CARGO_PKG_VERSION"));

/// Speech-to-text collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Raw transcript of a WAV payload
    async fn transcribe(&self, wav_bytes: Vec<u8>) -> Result<String, PipelineError>;
}

/// Transcript after the validity filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLyrics {
    /// Original text, or the sentinel
    pub text: String,
    /// False when the sentinel was substituted
    pub detected: bool,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | ',' | '?' | '!' | '\'' | ' ')
}

/// Apply the validity filter to a raw transcript
///
/// The check runs on the text exactly as the service returned it, so line
/// breaks and tabs count as disallowed. Valid text is kept with its original
/// casing, minus surrounding spaces. Empty or space-only text counts as no
/// lyrics.
pub fn validate_transcript(raw: &str) -> ValidatedLyrics {
    let text = raw.trim_matches(' ');
    let valid = !text.is_empty() && raw.chars().flat_map(char::to_lowercase).all(is_allowed);

    if valid {
        ValidatedLyrics {
            text: text.to_string(),
            detected: true,
        }
    } else {
        ValidatedLyrics {
            text: NO_LYRICS_SENTINEL.to_string(),
            detected: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

/// HTTP speech-to-text client
///
/// POSTs `audio/wav` bytes and expects `{"text": "..."}` back. Time limits
/// are applied by the caller.
pub struct SpeechClient {
    http_client: reqwest::Client,
    endpoint: Option<String>,
}

impl SpeechClient {
    pub fn new(endpoint: Option<String>) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[async_trait]
impl Transcriber for SpeechClient {
    async fn transcribe(&self, wav_bytes: Vec<u8>) -> Result<String, PipelineError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            PipelineError::UpstreamUnavailable("speech-to-text endpoint not configured".to_string())
        })?;

        tracing::debug!(size_bytes = wav_bytes.len(), endpoint, "Requesting transcription");

        let response = self
            .http_client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(wav_bytes)
            .send()
            .await
            .map_err(|e| PipelineError::UpstreamError(format!("transcription request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamError(format!(
                "transcription service returned {}: {}",
                status, body
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::UpstreamError(format!("invalid transcription response: {}", e)))?;

        parsed
            .text
            .ok_or_else(|| PipelineError::UpstreamError("transcription response has no text".to_string()))
    }
}
