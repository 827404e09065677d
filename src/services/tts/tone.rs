use crate::services::tts::{SpeakerEmbedding, SpeechBackend};
use crate::utils::audio::AudioSegment;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::f32::consts::PI;

/// Offline stand-in for a neural model. Renders each character as a short
/// tone whose register follows the reference voice, so output is
/// deterministic and needs no model server.
#[derive(Debug, Clone)]
pub struct ToneBackend {
    sample_rate: u32,
    char_ms: u32,
}

impl Default for ToneBackend {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            char_ms: 60,
        }
    }
}

#[async_trait]
impl SpeechBackend for ToneBackend {
    async fn embed(&self, waveform: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding> {
        if waveform.is_empty() || sample_rate == 0 {
            return Err(anyhow!("Cannot embed an empty voice sample"));
        }
        let n = waveform.len() as f32;
        let rms = (waveform.iter().map(|s| s * s).sum::<f32>() / n).sqrt();
        let crossings = waveform
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count() as f32;
        // Crossings per second, halved, approximates the dominant frequency.
        let pitch_hz = crossings / 2.0 / (n / sample_rate as f32);
        Ok(SpeakerEmbedding(vec![rms, pitch_hz]))
    }

    async fn synthesize(
        &self,
        text: &str,
        speaker: &SpeakerEmbedding,
        _language: &str,
    ) -> Result<AudioSegment> {
        let (rms, pitch_hz) = match speaker.0.as_slice() {
            [rms, pitch_hz, ..] => (*rms, *pitch_hz),
            _ => return Err(anyhow!("Speaker embedding has unexpected shape")),
        };
        let amplitude = (rms * 1.4).clamp(0.1, 0.8);
        let base_hz = pitch_hz.clamp(90.0, 260.0);

        let per_char = (u64::from(self.sample_rate) * u64::from(self.char_ms) / 1000) as usize;
        let fade = per_char / 8;
        let mut samples = Vec::with_capacity(text.chars().count() * per_char);

        for c in text.chars() {
            if c.is_whitespace() || c.is_ascii_punctuation() {
                samples.extend(std::iter::repeat(0.0).take(per_char));
                continue;
            }
            let step = (c as u32 % 12) as f32;
            let freq = base_hz * 2f32.powf(step / 12.0);
            for i in 0..per_char {
                let envelope = if i < fade {
                    i as f32 / fade as f32
                } else if i >= per_char - fade {
                    (per_char - i) as f32 / fade as f32
                } else {
                    1.0
                };
                let t = i as f32 / self.sample_rate as f32;
                samples.push((2.0 * PI * freq * t).sin() * amplitude * envelope);
            }
        }

        Ok(AudioSegment::new(samples, self.sample_rate))
    }

    fn name(&self) -> &str {
        "tone"
    }
}
