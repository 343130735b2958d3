//! Prompt Synthesizer
//!
//! Builds the image prompt for one segment from its features and lyrics,
//! the song-wide transcript, its position, and the captions of every
//! earlier segment that had completed when synthesis ran.
//!
//! Numeric features are turned into fixed qualitative phrases. Three-tier
//! thresholds include their upper bound in the middle tier: tempo 120 is
//! still "moderately paced", energy 0.5 still "steady".

use crate::models::{Features, PriorFrame};

/// Everything the synthesizer reads for one segment
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub global_transcript: &'a str,
    /// Validated local lyrics (may be the sentinel)
    pub local_lyrics: &'a str,
    pub features: &'a Features,
    /// 0-based segment index
    pub index: usize,
    pub total_segments: usize,
    /// Completed earlier segments, as read from the tracker
    pub prior: &'a [PriorFrame],
}

pub fn tempo_descriptor(bpm: f32) -> &'static str {
    if bpm < 60.0 {
        "slow and calming"
    } else if bpm <= 120.0 {
        "moderately paced, relaxed"
    } else {
        "fast-paced, energetic"
    }
}

pub fn energy_descriptor(energy: f32) -> &'static str {
    if energy < 0.1 {
        "soft, mellow tones"
    } else if energy <= 0.5 {
        "steady, balanced rhythms"
    } else {
        "intense, powerful vibrations"
    }
}

pub fn centroid_descriptor(centroid_hz: f32) -> &'static str {
    if centroid_hz < 1000.0 {
        "dark and resonant"
    } else if centroid_hz < 3000.0 {
        "warm and balanced"
    } else {
        "bright and sharp"
    }
}

/// Rolloff is a fraction of Nyquist
pub fn rolloff_descriptor(rolloff: f32) -> &'static str {
    if rolloff < 0.85 {
        "with low, mellow frequencies"
    } else {
        "with high, piercing frequencies"
    }
}

pub fn bandwidth_descriptor(bandwidth_hz: f32) -> &'static str {
    if bandwidth_hz < 1500.0 {
        "and a smooth texture"
    } else {
        "with a rough, textured feel"
    }
}

pub fn key_descriptor(features: &Features) -> &'static str {
    if features.key.is_bright() {
        "bright and uplifting"
    } else {
        "dark and mysterious"
    }
}

/// Ordinal-tagged references to earlier frames, oldest first
///
/// Frames at or after `index` are ignored; empty when nothing earlier
/// has completed.
pub fn continuity_clause(index: usize, prior: &[PriorFrame]) -> String {
    let mut frames: Vec<&PriorFrame> = prior.iter().filter(|f| f.index < index).collect();
    frames.sort_by_key(|f| f.index);

    frames
        .iter()
        .map(|f| format!("caption {}: {} (lyrics: {})", f.index + 1, f.caption, f.lyrics))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Assemble the full prompt for one segment
pub fn synthesize_prompt(input: &PromptInput<'_>) -> String {
    let features = input.features;
    let mut prompt = String::new();

    if input.index > 0 {
        let clause = continuity_clause(input.index, input.prior);
        if !clause.is_empty() {
            prompt.push_str("Continuing the story so far: ");
            prompt.push_str(&clause);
            prompt.push_str(". ");
        }
    }

    prompt.push_str(&format!(
        "Tempo: {} - {:.0} BPM, key {} - {} overtones. Energy {:.3} - {} vibe. \
         The timbre is {}, {} {}. ",
        tempo_descriptor(features.tempo_bpm),
        features.tempo_bpm,
        features.key,
        key_descriptor(features),
        features.energy,
        energy_descriptor(features.energy),
        centroid_descriptor(features.spectral_centroid),
        rolloff_descriptor(features.spectral_rolloff),
        bandwidth_descriptor(features.spectral_bandwidth),
    ));

    prompt.push_str(&format!("Lyrics of this section: {}. ", input.local_lyrics));
    prompt.push_str(&format!("Full song lyrics: {}. ", input.global_transcript));
    prompt.push_str(&format!("Frame {} of {}.", input.index + 1, input.total_segments));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PitchClass;

    fn features() -> Features {
        Features {
            tempo_bpm: 90.0,
            key: PitchClass::D,
            energy: 0.2,
            spectral_centroid: 2000.0,
            spectral_rolloff: 0.3,
            spectral_bandwidth: 800.0,
        }
    }

    fn frame(index: usize) -> PriorFrame {
        PriorFrame {
            index,
            caption: format!("cap{}", index),
            lyrics: format!("words{}", index),
        }
    }

    fn prompt_for(index: usize, prior: &[PriorFrame]) -> String {
        let f = features();
        synthesize_prompt(&PromptInput {
            global_transcript: "the whole song",
            local_lyrics: "this part",
            features: &f,
            index,
            total_segments: 5,
            prior,
        })
    }

    #[test]
    fn test_tempo_boundaries() {
        assert_eq!(tempo_descriptor(59.9), "slow and calming");
        assert_eq!(tempo_descriptor(60.0), "moderately paced, relaxed");
        assert_eq!(tempo_descriptor(120.0), "moderately paced, relaxed");
        assert_eq!(tempo_descriptor(120.1), "fast-paced, energetic");
    }

    #[test]
    fn test_energy_boundaries() {
        assert_eq!(energy_descriptor(0.09), "soft, mellow tones");
        assert_eq!(energy_descriptor(0.1), "steady, balanced rhythms");
        assert_eq!(energy_descriptor(0.5), "steady, balanced rhythms");
        assert_eq!(energy_descriptor(0.51), "intense, powerful vibrations");
    }

    #[test]
    fn test_timbre_boundaries() {
        assert_eq!(centroid_descriptor(999.0), "dark and resonant");
        assert_eq!(centroid_descriptor(1000.0), "warm and balanced");
        assert_eq!(centroid_descriptor(2999.9), "warm and balanced");
        assert_eq!(centroid_descriptor(3000.0), "bright and sharp");
        assert_eq!(rolloff_descriptor(0.84), "with low, mellow frequencies");
        assert_eq!(rolloff_descriptor(0.85), "with high, piercing frequencies");
        assert_eq!(bandwidth_descriptor(1499.0), "and a smooth texture");
        assert_eq!(bandwidth_descriptor(1500.0), "with a rough, textured feel");
    }

    #[test]
    fn test_key_descriptor() {
        let mut f = features();
        assert_eq!(key_descriptor(&f), "bright and uplifting");
        f.key = PitchClass::DSharp;
        assert_eq!(key_descriptor(&f), "dark and mysterious");
    }

    #[test]
    fn test_first_frame_has_no_continuity() {
        let prompt = prompt_for(0, &[frame(0)]);
        assert!(!prompt.contains("caption"));
        assert!(prompt.ends_with("Frame 1 of 5."));
        assert!(prompt.contains("Full song lyrics: the whole song."));
        assert!(prompt.contains("moderately paced, relaxed"));
        assert!(prompt.contains("warm and balanced, with low, mellow frequencies and a smooth texture"));
    }

    #[test]
    fn test_continuity_lists_completed_prefix_in_order() {
        // Segment 1 never completed; later frames must not leak in
        let prior = [frame(2), frame(0), frame(3), frame(4)];
        let prompt = prompt_for(3, &prior);

        let first = prompt.find("caption 1: cap0 (lyrics: words0)").unwrap();
        let third = prompt.find("caption 3: cap2 (lyrics: words2)").unwrap();
        assert!(first < third);
        assert!(!prompt.contains("caption 2:"));
        assert!(!prompt.contains("caption 4:"));
        assert!(!prompt.contains("caption 5:"));
        assert!(prompt.ends_with("Frame 4 of 5."));
    }

    #[test]
    fn test_later_frame_without_prior_results() {
        let prompt = prompt_for(2, &[]);
        assert!(!prompt.contains("Continuing the story"));
        assert!(prompt.contains("Lyrics of this section: this part."));
    }
}
