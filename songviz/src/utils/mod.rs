//! Utility modules for songviz

pub mod audio_decoder;
pub mod retry;

pub use audio_decoder::{
    decode_audio_bytes, encode_wav, read_wav_file, slice_samples, write_wav_file, DecodedAudio,
};
pub use retry::{retry_with_backoff, RetryPolicy};
