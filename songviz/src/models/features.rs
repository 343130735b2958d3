//! Per-segment musical descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the 12 pitch classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl PitchClass {
    /// Chroma order starting at C
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class for a chroma bin; wraps modulo 12
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Natural keys C, D, E, F, G, A read as bright; everything else as dark
    pub fn is_bright(&self) -> bool {
        matches!(
            self,
            PitchClass::C
                | PitchClass::D
                | PitchClass::E
                | PitchClass::F
                | PitchClass::G
                | PitchClass::A
        )
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Descriptors computed for one time range of the source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Tempo in beats per minute
    pub tempo_bpm: f32,
    /// Dominant pitch class
    pub key: PitchClass,
    /// RMS amplitude (>= 0)
    pub energy: f32,
    /// Spectral centroid in Hz
    pub spectral_centroid: f32,
    /// 85% energy rolloff as a fraction of Nyquist, in [0, 1]
    pub spectral_rolloff: f32,
    /// Spectral bandwidth in Hz
    pub spectral_bandwidth: f32,
}
