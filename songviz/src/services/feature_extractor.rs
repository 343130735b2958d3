//! Feature Extractor
//!
//! Computes the musical descriptors for one time range of the source:
//! RMS energy, spectral centroid/rolloff/bandwidth, dominant pitch class
//! and tempo. Stateless; safe to call concurrently for any ranges.
//!
//! **Algorithm (per range):**
//! 1. Slice the mono source to `[start, end)` in whole samples
//! 2. Energy = RMS of the raw slice
//! 3. Hann-windowed STFT (2048 / hop 512) with rustfft
//! 4. Centroid, bandwidth and 85% rolloff per frame, averaged over non-silent frames
//! 5. Chroma folded from the power spectrum; key = argmax
//! 6. Tempo = autocorrelation peak of spectral flux between 40 and 200 BPM

use async_trait::async_trait;
use rustfft::{num_complex::Complex32, FftPlanner};
use std::sync::Arc;
use tracing::debug;

use super::PipelineError;
use crate::models::{Features, PitchClass};
use crate::utils::audio_decoder::{slice_samples, DecodedAudio};

const FRAME_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;
const ROLLOFF_PERCENT: f32 = 0.85;
const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 200.0;
/// Chroma ignores sub-audio rumble and the upper harmonics
const CHROMA_MIN_HZ: f32 = 27.5;
const CHROMA_MAX_HZ: f32 = 5000.0;

/// Source of per-segment descriptors
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Descriptors for `[start_secs, end_secs)` of `source`
    ///
    /// # Errors
    /// `InvalidRange` if `start >= end` or the range leaves the source.
    async fn extract(
        &self,
        source: Arc<DecodedAudio>,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Features, PipelineError>;
}

/// FFT-based extractor running on the blocking pool
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectralFeatureExtractor;

impl SpectralFeatureExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureExtractor for SpectralFeatureExtractor {
    async fn extract(
        &self,
        source: Arc<DecodedAudio>,
        start_secs: f64,
        end_secs: f64,
    ) -> Result<Features, PipelineError> {
        tokio::task::spawn_blocking(move || analyze_range(&source, start_secs, end_secs))
            .await
            .map_err(|e| PipelineError::IoFailure(format!("feature task failed: {}", e)))?
    }
}

/// Validate a requested range against the source duration
pub fn check_range(audio: &DecodedAudio, start_secs: f64, end_secs: f64) -> Result<(), PipelineError> {
    let duration = audio.duration_seconds;
    let tolerance = if audio.sample_rate > 0 {
        0.5 / audio.sample_rate as f64
    } else {
        0.0
    };

    let valid = start_secs.is_finite()
        && end_secs.is_finite()
        && start_secs >= 0.0
        && start_secs < end_secs
        && end_secs <= duration + tolerance;

    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidRange {
            start: start_secs,
            end: end_secs,
            duration,
        })
    }
}

/// Synchronous analysis of one range
pub fn analyze_range(
    audio: &DecodedAudio,
    start_secs: f64,
    end_secs: f64,
) -> Result<Features, PipelineError> {
    check_range(audio, start_secs, end_secs)?;

    let sr = audio.sample_rate;
    let samples = slice_samples(audio, start_secs, end_secs - start_secs);

    let energy = rms(samples);
    let spectra = magnitude_spectra(samples);
    let (centroid, rolloff, bandwidth) = spectral_shape(&spectra, sr);
    let key = dominant_pitch_class(&spectra, sr);
    let tempo = estimate_tempo(&spectra, sr);

    debug!(
        start_secs,
        end_secs,
        frames = spectra.len(),
        tempo,
        key = %key,
        energy,
        "Features extracted"
    );

    Ok(Features {
        tempo_bpm: tempo,
        key,
        energy,
        spectral_centroid: centroid,
        spectral_rolloff: rolloff,
        spectral_bandwidth: bandwidth,
    })
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

fn hann(n: usize) -> Vec<f32> {
    let c = std::f32::consts::PI * 2.0 / n as f32;
    (0..n).map(|i| 0.5 - 0.5 * (c * i as f32).cos()).collect()
}

/// Magnitude spectra (bins `0..=FRAME_SIZE/2`) of every STFT frame
///
/// Ranges shorter than one frame are zero-padded into a single frame.
fn magnitude_spectra(samples: &[f32]) -> Vec<Vec<f32>> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FRAME_SIZE);
    let window = hann(FRAME_SIZE);
    let mut buf = vec![Complex32::new(0.0, 0.0); FRAME_SIZE];

    let frame_count = if samples.len() <= FRAME_SIZE {
        1
    } else {
        (samples.len() - FRAME_SIZE) / HOP_SIZE + 1
    };

    let mut spectra = Vec::with_capacity(frame_count);
    for frame in 0..frame_count {
        let offset = frame * HOP_SIZE;
        for (i, slot) in buf.iter_mut().enumerate() {
            let sample = samples.get(offset + i).copied().unwrap_or(0.0);
            *slot = Complex32::new(sample * window[i], 0.0);
        }
        fft.process(&mut buf);
        spectra.push(buf[..=FRAME_SIZE / 2].iter().map(|c| c.norm()).collect());
    }
    spectra
}

fn bin_frequency(bin: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / FRAME_SIZE as f32
}

/// Mean (centroid Hz, rolloff fraction of Nyquist, bandwidth Hz) over non-silent frames
fn spectral_shape(spectra: &[Vec<f32>], sample_rate: u32) -> (f32, f32, f32) {
    let nyquist = sample_rate as f32 / 2.0;
    let mut centroid_sum = 0.0;
    let mut rolloff_sum = 0.0;
    let mut bandwidth_sum = 0.0;
    let mut counted = 0usize;

    for mags in spectra {
        let total: f32 = mags.iter().sum();
        if total <= f32::EPSILON {
            continue;
        }

        let centroid: f32 = mags
            .iter()
            .enumerate()
            .map(|(k, m)| bin_frequency(k, sample_rate) * m)
            .sum::<f32>()
            / total;

        let variance: f32 = mags
            .iter()
            .enumerate()
            .map(|(k, m)| {
                let d = bin_frequency(k, sample_rate) - centroid;
                m * d * d
            })
            .sum::<f32>()
            / total;

        let threshold = ROLLOFF_PERCENT * total;
        let mut cumulative = 0.0;
        let mut rolloff_bin = mags.len() - 1;
        for (k, m) in mags.iter().enumerate() {
            cumulative += m;
            if cumulative >= threshold {
                rolloff_bin = k;
                break;
            }
        }

        centroid_sum += centroid;
        bandwidth_sum += variance.sqrt();
        rolloff_sum += if nyquist > 0.0 {
            (bin_frequency(rolloff_bin, sample_rate) / nyquist).min(1.0)
        } else {
            0.0
        };
        counted += 1;
    }

    if counted == 0 {
        return (0.0, 0.0, 0.0);
    }
    let n = counted as f32;
    (centroid_sum / n, rolloff_sum / n, bandwidth_sum / n)
}

/// Pitch class with the most spectral power; C for silence
fn dominant_pitch_class(spectra: &[Vec<f32>], sample_rate: u32) -> PitchClass {
    let mut chroma = [0f32; 12];
    for mags in spectra {
        for (k, m) in mags.iter().enumerate().skip(1) {
            let freq = bin_frequency(k, sample_rate);
            if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&freq) {
                continue;
            }
            // MIDI 60 is C4, so midi mod 12 == 0 is C
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            let class = (midi.round() as i64).rem_euclid(12) as usize;
            chroma[class] += m * m;
        }
    }

    let (best, power) = chroma
        .iter()
        .enumerate()
        .fold((0usize, 0f32), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });

    if power <= 0.0 {
        PitchClass::C
    } else {
        PitchClass::from_index(best)
    }
}

/// Tempo from the spectral flux autocorrelation; 0.0 when undeterminable
fn estimate_tempo(spectra: &[Vec<f32>], sample_rate: u32) -> f32 {
    if spectra.len() < 2 || sample_rate == 0 {
        return 0.0;
    }

    let mut flux: Vec<f32> = spectra
        .windows(2)
        .map(|pair| {
            pair[1]
                .iter()
                .zip(&pair[0])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum()
        })
        .collect();

    let mean = flux.iter().sum::<f32>() / flux.len() as f32;
    for v in &mut flux {
        *v -= mean;
    }

    let frames_per_sec = sample_rate as f32 / HOP_SIZE as f32;
    let min_lag = ((60.0 * frames_per_sec / MAX_BPM).floor() as usize).max(1);
    let max_lag = (60.0 * frames_per_sec / MIN_BPM).ceil() as usize;
    if flux.len() <= min_lag {
        return 0.0;
    }
    let max_lag = max_lag.min(flux.len() - 1);

    let mut best_lag = 0usize;
    let mut best_score = 0f32;
    for lag in min_lag..=max_lag {
        let score: f32 = flux.iter().zip(&flux[lag..]).map(|(a, b)| a * b).sum();
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        0.0
    } else {
        60.0 * frames_per_sec / best_lag as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 16384 Hz makes one hop exactly 1/32 s and one FFT bin exactly 8 Hz
    const SR: u32 = 16_384;

    fn sine(freq: f32, amplitude: f32, seconds: f32) -> DecodedAudio {
        let n = (seconds * SR as f32) as usize;
        let samples = (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        DecodedAudio::from_mono(samples, SR)
    }

    fn click_track(bpm: f32, seconds: f32) -> DecodedAudio {
        let n = (seconds * SR as f32) as usize;
        let period = (60.0 / bpm * SR as f32) as usize;
        let mut samples = vec![0.0f32; n];
        for beat in (0..n).step_by(period) {
            for i in 0..256 {
                if let Some(s) = samples.get_mut(beat + i) {
                    *s = 0.8 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / SR as f32).sin();
                }
            }
        }
        DecodedAudio::from_mono(samples, SR)
    }

    #[test]
    fn test_sine_features() {
        let audio = sine(440.0, 0.5, 2.0);
        let features = analyze_range(&audio, 0.0, 2.0).unwrap();

        assert_eq!(features.key, PitchClass::A);
        assert!((features.energy - 0.5 / 2f32.sqrt()).abs() < 0.01);
        assert!((features.spectral_centroid - 440.0).abs() < 30.0, "{}", features.spectral_centroid);
        assert!(features.spectral_rolloff < 0.1);
        assert!(features.spectral_bandwidth < 200.0);
    }

    #[test]
    fn test_click_track_tempo() {
        let audio = click_track(120.0, 10.0);
        let features = analyze_range(&audio, 0.0, 10.0).unwrap();
        assert!((features.tempo_bpm - 120.0).abs() < 1.0, "{}", features.tempo_bpm);
    }

    #[test]
    fn test_silence_is_all_zero() {
        let audio = DecodedAudio::from_mono(vec![0.0; SR as usize * 3], SR);
        let features = analyze_range(&audio, 0.5, 2.5).unwrap();
        assert_eq!(features.energy, 0.0);
        assert_eq!(features.tempo_bpm, 0.0);
        assert_eq!(features.spectral_centroid, 0.0);
        assert_eq!(features.key, PitchClass::C);
    }

    #[test]
    fn test_short_range_is_padded() {
        let audio = sine(440.0, 0.5, 1.0);
        let features = analyze_range(&audio, 0.0, 0.05).unwrap();
        assert_eq!(features.tempo_bpm, 0.0);
        assert!(features.energy > 0.0);
    }

    #[test]
    fn test_invalid_ranges() {
        let audio = sine(440.0, 0.5, 1.0);
        for (start, end) in [(0.5, 0.5), (0.6, 0.4), (-0.1, 0.5), (0.0, 1.5), (0.0, f64::NAN)] {
            assert!(
                matches!(
                    analyze_range(&audio, start, end),
                    Err(PipelineError::InvalidRange { .. })
                ),
                "range {}..{} accepted",
                start,
                end
            );
        }
    }

    #[test]
    fn test_end_tolerance_of_half_sample() {
        let audio = sine(440.0, 0.5, 1.0);
        let nudge = 0.4 / SR as f64;
        assert!(analyze_range(&audio, 0.0, 1.0 + nudge).is_ok());
    }

    #[tokio::test]
    async fn test_async_extract_matches_sync() {
        let audio = Arc::new(sine(880.0, 0.3, 1.0));
        let extractor = SpectralFeatureExtractor::new();
        let features = extractor.extract(audio.clone(), 0.0, 1.0).await.unwrap();
        assert_eq!(features, analyze_range(&audio, 0.0, 1.0).unwrap());
        assert_eq!(features.key, PitchClass::A);
    }
}
