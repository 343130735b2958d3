//! Audio Decoding Utilities
//!
//! Decodes downloaded audio to mono f32 PCM, slices it by time range, and
//! renders PCM back to 16-bit WAV for chunk files and speech-to-text uploads.
//!
//! Uses symphonia for format-agnostic decoding (MP3, FLAC, AAC, WAV, OGG, ...)
//! and hound for WAV writing.

use anyhow::{Context, Result};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded audio result
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono audio samples (f32, range [-1.0, 1.0])
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Original channel count
    pub channels: usize,
    /// Duration in seconds
    pub duration_seconds: f64,
}

impl DecodedAudio {
    /// Wrap already-decoded mono samples
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_seconds = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / sample_rate as f64
        };
        Self {
            samples,
            sample_rate,
            channels: 1,
            duration_seconds,
        }
    }
}

/// Decode in-memory audio bytes to mono f32 PCM samples
///
/// **Algorithm:**
/// 1. Probe format using symphonia (no extension hint available)
/// 2. Find the first decodable audio track
/// 3. Decode all packets, skipping recoverable decode errors
/// 4. Average channels to mono
///
/// # Errors
/// * Unsupported or unrecognised format
/// * Missing sample rate / channel layout
/// * Unrecoverable decoder error
pub fn decode_audio_bytes(bytes: Vec<u8>) -> Result<DecodedAudio> {
    tracing::debug!(size_bytes = bytes.len(), "Decoding audio bytes");

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Sample rate unknown")?;
    let channel_count = track
        .codec_params
        .channels
        .context("Channels unknown")?
        .count();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // End of stream
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow::anyhow!("Error reading packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::debug!("Skipping undecodable packet: {}", msg);
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("Failed to decode packet: {}", e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        if channels == 1 {
            all_samples.extend_from_slice(buffer.samples());
        } else {
            all_samples.extend(
                buffer
                    .samples()
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    let mut audio = DecodedAudio::from_mono(all_samples, sample_rate);
    audio.channels = channel_count;

    tracing::debug!(
        total_samples = audio.samples.len(),
        sample_rate,
        duration_seconds = format!("{:.2}", audio.duration_seconds),
        "Audio decoding complete"
    );

    Ok(audio)
}

/// Sample range `[start, start + duration)` in seconds, clamped to the signal
pub fn slice_samples(audio: &DecodedAudio, start_secs: f64, duration_secs: f64) -> &[f32] {
    let sr = audio.sample_rate as f64;
    let len = audio.samples.len();
    let start = ((start_secs.max(0.0) * sr).round() as usize).min(len);
    let end = (((start_secs + duration_secs).max(0.0) * sr).round() as usize).clamp(start, len);
    &audio.samples[start..end]
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Render mono f32 samples as an in-memory 16-bit PCM WAV file
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .context("Failed to create WAV writer")?;
        for &sample in samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

/// Write mono f32 samples to a 16-bit PCM WAV file
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(to_i16(sample))?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;
    Ok(())
}

/// Read a 16-bit PCM WAV file written by [`write_wav_file`]
pub fn read_wav_file(path: &Path) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .with_context(|| format!("Failed to read samples: {}", path.display()))?;
    Ok(DecodedAudio::from_mono(samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, seconds: f64) -> Vec<f32> {
        let n = (sample_rate as f64 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_encode_then_decode_preserves_length() {
        let samples = sine(8000, 1.5);
        let wav = encode_wav(&samples, 8000).unwrap();

        let decoded = decode_audio_bytes(wav).unwrap();
        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples.len(), samples.len());
        assert!((decoded.duration_seconds - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_audio_bytes(b"definitely not audio".to_vec()).is_err());
    }

    #[test]
    fn test_slice_is_clamped() {
        let audio = DecodedAudio::from_mono(vec![0.0; 1000], 100);
        assert_eq!(slice_samples(&audio, 0.0, 2.0).len(), 200);
        assert_eq!(slice_samples(&audio, 9.0, 5.0).len(), 100);
        assert_eq!(slice_samples(&audio, 20.0, 5.0).len(), 0);
    }

    #[test]
    fn test_wav_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.wav");
        write_wav_file(&path, &sine(8000, 0.25), 8000).unwrap();

        let audio = read_wav_file(&path).unwrap();
        assert_eq!(audio.samples.len(), 2000);
        assert_eq!(audio.sample_rate, 8000);
    }
}
