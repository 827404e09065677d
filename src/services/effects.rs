use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::{StoryError, StoryResult};
use crate::utils::audio::{resample_linear, AudioSegment};

const MIN_SANE_RATE: f32 = 0.25;
const MAX_SANE_RATE: f32 = 4.0;

/// Tempo and pitch ratios are clamped to this range before processing so a
/// segment never grows or shrinks by more than 16x.
pub const MAX_EFFECT_RATIO: f64 = 16.0;

/// Speaking rate and pitch, both as linear ratios where 1.0 means unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParams {
    pub speaking_rate: f32,
    pub pitch: f32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            speaking_rate: 1.0,
            pitch: 1.0,
        }
    }
}

impl EffectParams {
    pub fn new(speaking_rate: f32, pitch: f32) -> StoryResult<Self> {
        let params = Self {
            speaking_rate,
            pitch,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> StoryResult<()> {
        if !(self.speaking_rate.is_finite() && self.speaking_rate > 0.0) {
            return Err(StoryError::InvalidParameter(format!(
                "speaking rate must be > 0, got {}",
                self.speaking_rate
            )));
        }
        if !(self.pitch.is_finite() && self.pitch > 0.0) {
            return Err(StoryError::InvalidParameter(format!(
                "pitch must be > 0, got {}",
                self.pitch
            )));
        }
        Ok(())
    }

    pub fn is_identity(&self) -> bool {
        self.speaking_rate == 1.0 && self.pitch == 1.0
    }

    pub fn semitones(&self) -> f64 {
        12.0 * (self.pitch as f64).log2()
    }

    pub fn is_degenerate_rate(&self) -> bool {
        self.speaking_rate < MIN_SANE_RATE || self.speaking_rate > MAX_SANE_RATE
    }
}

/// Tempo and pitch transforms on mono segments.
///
/// Tempo is changed with a windowed overlap-add stretch, which keeps pitch.
/// Pitch is changed by stretching by the pitch ratio and resampling back to
/// the original length, which keeps tempo. Tempo is always applied first.
#[derive(Debug, Clone)]
pub struct AudioEffectsProcessor {
    frame_ms: f32,
}

impl Default for AudioEffectsProcessor {
    fn default() -> Self {
        Self { frame_ms: 40.0 }
    }
}

impl AudioEffectsProcessor {
    pub fn apply(&self, segment: AudioSegment, params: &EffectParams) -> StoryResult<AudioSegment> {
        params.validate()?;
        if params.is_identity() || segment.is_empty() {
            return Ok(segment);
        }
        if params.is_degenerate_rate() {
            warn!(
                "Speaking rate {} outside [{}, {}], output will likely be degraded",
                params.speaking_rate, MIN_SANE_RATE, MAX_SANE_RATE
            );
        }

        let sample_rate = segment.sample_rate();
        let mut samples = segment.into_samples();

        if params.speaking_rate != 1.0 {
            let tempo = clamp_ratio("speaking rate", params.speaking_rate as f64);
            debug!("Applying tempo {}", tempo);
            samples = self.stretch(&samples, tempo, sample_rate)?;
        }

        if params.pitch != 1.0 {
            let semitones = params.semitones();
            debug!("Applying pitch shift of {:.2} semitones", semitones);
            samples = self.shift_pitch(&samples, semitones, sample_rate)?;
        }

        Ok(AudioSegment::new(samples, sample_rate))
    }

    /// Changes duration by `1 / tempo` without touching pitch.
    fn stretch(&self, samples: &[f32], tempo: f64, sample_rate: u32) -> StoryResult<Vec<f32>> {
        let frame = self.frame_len(sample_rate);
        if samples.len() < frame {
            // Too short to window; plain resampling is inaudible at this length.
            return Ok(resample_linear(samples, tempo));
        }

        let hop_out = frame / 2;
        let hop_in = hop_out as f64 * tempo;
        let out_len = (samples.len() as f64 / tempo).round() as usize;
        let padded = out_len.checked_add(frame).ok_or_else(|| {
            StoryError::InvalidParameter(format!(
                "segment of {} samples is too long to stretch by {}",
                samples.len(),
                tempo
            ))
        })?;
        let window = hann(frame);

        let mut out = vec![0.0f32; padded];
        let mut norm = vec![0.0f32; padded];

        let mut k = 0usize;
        while k * hop_out < out_len {
            let out_pos = k * hop_out;
            let in_pos = (k as f64 * hop_in).round() as usize;
            for (j, w) in window.iter().enumerate() {
                let src = samples.get(in_pos + j).copied().unwrap_or(0.0);
                out[out_pos + j] += src * w;
                norm[out_pos + j] += w;
            }
            k += 1;
        }

        out.truncate(out_len);
        for (s, w) in out.iter_mut().zip(&norm) {
            if *w > 1e-3 {
                *s /= *w;
            }
        }
        Ok(out)
    }

    /// The stretched signal is conceptually at `sample_rate * ratio`; the
    /// resample brings it back to `sample_rate` at the original length.
    fn shift_pitch(
        &self,
        samples: &[f32],
        semitones: f64,
        sample_rate: u32,
    ) -> StoryResult<Vec<f32>> {
        let ratio = clamp_ratio("pitch", 2f64.powf(semitones / 12.0));
        let stretched = self.stretch(samples, 1.0 / ratio, sample_rate)?;
        let mut shifted = resample_linear(&stretched, ratio);
        shifted.resize(samples.len(), 0.0);
        Ok(shifted)
    }

    fn frame_len(&self, sample_rate: u32) -> usize {
        let len = (sample_rate as f32 * self.frame_ms / 1000.0).round() as usize;
        (len & !1).max(4)
    }
}

fn clamp_ratio(what: &str, ratio: f64) -> f64 {
    let clamped = ratio.clamp(1.0 / MAX_EFFECT_RATIO, MAX_EFFECT_RATIO);
    if clamped != ratio {
        warn!("Clamping {} ratio {} to {}", what, ratio, clamped);
    }
    clamped
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / len as f32;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, secs: f32, sample_rate: u32) -> AudioSegment {
        let n = (secs * sample_rate as f32) as usize;
        let samples = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();
        AudioSegment::new(samples, sample_rate)
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count()
    }

    #[test]
    fn test_identity_is_untouched() -> StoryResult<()> {
        let segment = sine(220.0, 0.3, 16000);
        let params = EffectParams::default();
        assert!(params.is_identity());

        let out = AudioEffectsProcessor::default().apply(segment.clone(), &params)?;
        assert_eq!(out, segment);
        Ok(())
    }

    #[test]
    fn test_semitones() {
        let up = EffectParams::new(1.0, 2.0).unwrap();
        let down = EffectParams::new(1.0, 0.5).unwrap();
        assert!((up.semitones() - 12.0).abs() < 1e-9);
        assert!((down.semitones() + 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_positive_ratios() {
        assert!(matches!(
            EffectParams::new(0.0, 1.0),
            Err(StoryError::InvalidParameter(_))
        ));
        assert!(matches!(
            EffectParams::new(1.0, -2.0),
            Err(StoryError::InvalidParameter(_))
        ));
        assert!(EffectParams::new(f32::NAN, 1.0).is_err());

        let bad = EffectParams {
            speaking_rate: 1.0,
            pitch: 0.0,
        };
        let result = AudioEffectsProcessor::default().apply(sine(100.0, 0.1, 8000), &bad);
        assert!(result.is_err());
    }

    #[test]
    fn test_tempo_changes_duration_not_pitch() -> StoryResult<()> {
        let segment = sine(200.0, 0.5, 16000);
        let processor = AudioEffectsProcessor::default();

        let fast = processor.apply(segment.clone(), &EffectParams::new(2.0, 1.0)?)?;
        assert_eq!(fast.sample_rate(), 16000);
        assert_eq!(fast.len(), segment.len() / 2);

        let slow = processor.apply(segment.clone(), &EffectParams::new(0.5, 1.0)?)?;
        assert_eq!(slow.len(), segment.len() * 2);

        // Crossings per second stay the same.
        let base = zero_crossings(segment.samples()) as f64 / segment.duration_secs();
        let slowed = zero_crossings(slow.samples()) as f64 / slow.duration_secs();
        assert!((slowed / base - 1.0).abs() < 0.1, "base {} slowed {}", base, slowed);
        Ok(())
    }

    #[test]
    fn test_pitch_keeps_rate_and_length() -> StoryResult<()> {
        let segment = sine(200.0, 0.5, 16000);
        let processor = AudioEffectsProcessor::default();

        for pitch in [0.5f32, 0.8, 1.3, 2.0] {
            let out = processor.apply(segment.clone(), &EffectParams::new(1.0, pitch)?)?;
            assert_eq!(out.sample_rate(), segment.sample_rate());
            assert_eq!(out.len(), segment.len());
        }

        let up = processor.apply(segment.clone(), &EffectParams::new(1.0, 2.0)?)?;
        let ratio = zero_crossings(up.samples()) as f64 / zero_crossings(segment.samples()) as f64;
        assert!((1.8..2.2).contains(&ratio), "crossing ratio {}", ratio);
        Ok(())
    }

    #[test]
    fn test_combined_effects_are_deterministic() -> StoryResult<()> {
        let segment = sine(330.0, 0.4, 22050);
        let processor = AudioEffectsProcessor::default();
        let params = EffectParams::new(1.5, 0.7)?;

        let a = processor.apply(segment.clone(), &params)?;
        let b = processor.apply(segment.clone(), &params)?;
        assert_eq!(a, b);
        assert_eq!(a.sample_rate(), 22050);
        Ok(())
    }

    #[test]
    fn test_degenerate_rate_is_not_fatal() -> StoryResult<()> {
        let params = EffectParams::new(5.0, 1.0)?;
        assert!(params.is_degenerate_rate());
        assert!(!EffectParams::new(1.2, 1.0)?.is_degenerate_rate());

        let out = AudioEffectsProcessor::default().apply(sine(200.0, 0.5, 16000), &params)?;
        assert_eq!(out.len(), 1600);

        let slow = EffectParams::new(0.2, 1.0)?;
        assert!(slow.is_degenerate_rate());
        let out = AudioEffectsProcessor::default().apply(sine(200.0, 0.5, 16000), &slow)?;
        assert_eq!(out.len(), 40000);
        assert_eq!(out.sample_rate(), 16000);
        Ok(())
    }

    #[test]
    fn test_extreme_ratios_are_clamped() -> StoryResult<()> {
        let processor = AudioEffectsProcessor::default();
        let segment = AudioSegment::new(vec![0.1; 1000], 16000);

        let crawl = processor.apply(segment.clone(), &EffectParams::new(1e-30, 1.0)?)?;
        assert_eq!(crawl.len(), 16000);

        let rush = processor.apply(segment.clone(), &EffectParams::new(1e30, 1.0)?)?;
        assert_eq!(rush.len(), 63);

        for pitch in [1e30f32, 1e-30] {
            let out = processor.apply(segment.clone(), &EffectParams::new(1.0, pitch)?)?;
            assert_eq!(out.len(), segment.len());
            assert_eq!(out.sample_rate(), 16000);
        }
        Ok(())
    }
}
