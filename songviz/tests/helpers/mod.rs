//! Shared fixtures for songviz integration tests
//!
//! WAV generation plus scripted collaborators that stand in for the
//! speech-to-text and image services.

#![allow(dead_code)]

use async_trait::async_trait;
use songviz::services::image_client::validate_endpoint;
use songviz::services::{
    AudioSource, GeneratedImage, ImageGenerator, JobTracker, Orchestrator, OrchestratorConfig,
    PipelineError, SegmentStore, SpectralFeatureExtractor, Transcriber,
};
use songviz::utils::RetryPolicy;
use songviz_common::events::EventBus;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const SAMPLE_RATE: u32 = 16_000;
pub const GLOBAL_TRANSCRIPT: &str = "the whole song sings along";
pub const LOCAL_TRANSCRIPT: &str = "la la la";

/// Mono 16-bit WAV of a 440 Hz tone with a soft pulse every half second
pub fn tone_wav(duration_seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let total = (duration_seconds * sample_rate as f64).round() as usize;
        let pulse = (sample_rate / 2) as usize;
        for n in 0..total {
            let t = n as f32 / sample_rate as f32;
            let envelope = if n % pulse < pulse / 8 { 1.0 } else { 0.4 };
            let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5 * envelope;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_tone_wav(path: &Path, duration_seconds: f64) {
    std::fs::write(path, tone_wav(duration_seconds, SAMPLE_RATE)).unwrap();
}

/// Source that hands back fixed bytes for any URL
pub struct StaticSource {
    bytes: Vec<u8>,
}

impl StaticSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl AudioSource for StaticSource {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, PipelineError> {
        Ok(self.bytes.clone())
    }
}

/// First call answers with the global transcript, later calls with the
/// local one
pub struct ScriptedTranscriber {
    calls: AtomicUsize,
    local: String,
    fail_global: bool,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self::with_local(LOCAL_TRANSCRIPT)
    }

    pub fn with_local(local: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            local: local.to_string(),
            fail_global: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_global: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _wav_bytes: Vec<u8>) -> Result<String, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            if self.fail_global {
                return Err(PipelineError::UpstreamError("speech service returned 503".into()));
            }
            return Ok(GLOBAL_TRANSCRIPT.to_string());
        }
        Ok(self.local.clone())
    }
}

/// Image generator that waits for a permit before answering
///
/// Captions are `caption-{index}` where the index is read from the
/// `Frame N of M` tail of the prompt.
pub struct GatedImageGenerator {
    endpoint: RwLock<Option<String>>,
    gate: Semaphore,
    fail: HashSet<usize>,
    prompts: Mutex<Vec<(usize, String)>>,
}

impl GatedImageGenerator {
    /// Answers immediately
    pub fn open() -> Self {
        Self::build(Semaphore::MAX_PERMITS, HashSet::new())
    }

    /// Blocks every call until `release` hands out a permit
    pub fn closed() -> Self {
        Self::build(0, HashSet::new())
    }

    /// Answers immediately but fails the listed segment indices
    pub fn failing_on(indices: &[usize]) -> Self {
        Self::build(Semaphore::MAX_PERMITS, indices.iter().copied().collect())
    }

    pub fn unconfigured() -> Self {
        let generator = Self::open();
        *generator.endpoint.write().unwrap() = None;
        generator
    }

    fn build(permits: usize, fail: HashSet<usize>) -> Self {
        Self {
            endpoint: RwLock::new(Some("http://images.test/generate".to_string())),
            gate: Semaphore::new(permits),
            fail,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    /// Prompts seen so far, keyed by segment index
    pub fn prompts(&self) -> Vec<(usize, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompt_for(&self, index: usize) -> Option<String> {
        self.prompts()
            .into_iter()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, prompt)| prompt)
    }
}

pub fn frame_index(prompt: &str) -> usize {
    let (_, tail) = prompt.rsplit_once("Frame ").unwrap();
    let number: usize = tail.split(' ').next().unwrap().parse().unwrap();
    number - 1
}

#[async_trait]
impl ImageGenerator for GatedImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, PipelineError> {
        let index = frame_index(prompt);
        self.prompts.lock().unwrap().push((index, prompt.to_string()));

        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| PipelineError::UpstreamError(e.to_string()))?;
        permit.forget();

        if self.fail.contains(&index) {
            return Err(PipelineError::UpstreamError(format!("render failed for {}", index)));
        }
        Ok(GeneratedImage {
            image: "aW1hZ2U=".to_string(),
            caption: format!("caption-{}", index),
        })
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.read().unwrap().clone()
    }

    fn set_endpoint(&self, url: &str) -> Result<(), PipelineError> {
        let url = validate_endpoint(url)?;
        *self.endpoint.write().unwrap() = Some(url);
        Ok(())
    }
}

pub fn test_config(segment_duration_secs: f64, analysis_workers: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        segment_duration_secs,
        analysis_workers,
        fetch_timeout: Duration::from_secs(10),
        transcription_timeout: Duration::from_secs(10),
        image_timeout: Duration::from_secs(30),
        image_retry: RetryPolicy::none(),
    }
}

/// Orchestrator wired with the real store and feature extractor
pub fn orchestrator(
    chunk_folder: &Path,
    source: Arc<dyn AudioSource>,
    transcriber: Arc<dyn Transcriber>,
    images: Arc<dyn ImageGenerator>,
    config: OrchestratorConfig,
) -> Arc<Orchestrator> {
    let tracker = Arc::new(JobTracker::new(EventBus::new(256)));
    let store = Arc::new(SegmentStore::new(chunk_folder.to_path_buf()));
    Arc::new(Orchestrator::new(
        tracker,
        store,
        source,
        Arc::new(SpectralFeatureExtractor::new()),
        transcriber,
        images,
        config,
    ))
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
