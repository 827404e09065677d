use crate::core::config::Config;
use crate::core::error::{StoryError, StoryResult};
use crate::utils::audio::{decode_wav, AudioSegment};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fixed-size representation of a voice used to condition synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerEmbedding(pub Vec<f32>);

/// Reference recording for voice cloning. Sessions hold it in an `Arc`,
/// and the pointer identifies the voice for embedding reuse.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    sample: AudioSegment,
}

impl VoiceProfile {
    pub fn new(sample: AudioSegment) -> Self {
        Self { sample }
    }

    pub fn from_wav(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(decode_wav(bytes)?))
    }

    pub fn samples(&self) -> &[f32] {
        self.sample.samples()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample.sample_rate()
    }

    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }
}

/// The external speech model: voice embedding extraction plus synthesis.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn embed(&self, waveform: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding>;

    async fn synthesize(
        &self,
        text: &str,
        speaker: &SpeakerEmbedding,
        language: &str,
    ) -> Result<AudioSegment>;

    fn name(&self) -> &str;
}

/// Per-session adapter over a shared `SpeechBackend`. Keeps the embedding
/// of the last voice it saw so a session embeds its voice exactly once.
pub struct SpeechSynthesizer {
    backend: Arc<dyn SpeechBackend>,
    language: String,
    cached: Option<(Arc<VoiceProfile>, Arc<SpeakerEmbedding>)>,
}

impl SpeechSynthesizer {
    pub fn new(backend: Arc<dyn SpeechBackend>, language: impl Into<String>) -> Self {
        Self {
            backend,
            language: language.into(),
            cached: None,
        }
    }

    pub async fn synthesize(
        &mut self,
        text: &str,
        voice: &Arc<VoiceProfile>,
    ) -> StoryResult<AudioSegment> {
        if text.trim().is_empty() {
            return Err(StoryError::InvalidParameter(
                "cannot synthesize empty text".to_string(),
            ));
        }
        if voice.is_empty() {
            return Err(StoryError::InvalidParameter(
                "voice sample is empty".to_string(),
            ));
        }

        let speaker = self.embedding_for(voice).await?;
        debug!(
            "Synthesizing {} chars with backend {}",
            text.chars().count(),
            self.backend.name()
        );
        let segment = self
            .backend
            .synthesize(text, &speaker, &self.language)
            .await
            .map_err(StoryError::Synthesis)?;

        if segment.sample_rate() == 0 {
            return Err(StoryError::Synthesis(anyhow!(
                "backend {} returned audio with a zero sample rate",
                self.backend.name()
            )));
        }
        Ok(segment)
    }

    async fn embedding_for(&mut self, voice: &Arc<VoiceProfile>) -> StoryResult<Arc<SpeakerEmbedding>> {
        if let Some((cached_voice, embedding)) = &self.cached {
            if Arc::ptr_eq(cached_voice, voice) {
                return Ok(embedding.clone());
            }
        }

        info!(
            "Extracting speaker embedding from {:.1}s voice sample",
            voice.samples().len() as f64 / voice.sample_rate().max(1) as f64
        );
        let embedding = self
            .backend
            .embed(voice.samples(), voice.sample_rate())
            .await
            .map_err(StoryError::Synthesis)?;
        let embedding = Arc::new(embedding);
        self.cached = Some((voice.clone(), embedding.clone()));
        Ok(embedding)
    }
}

pub fn create_speech_backend(config: &Config) -> Result<Arc<dyn SpeechBackend>> {
    info!("Initializing speech backend for provider: {}", config.audio.provider);
    match config.audio.provider.as_str() {
        "remote" => {
            let remote_config = config
                .audio
                .remote
                .clone()
                .ok_or_else(|| anyhow!("Remote TTS config missing"))?;
            Ok(Arc::new(remote::RemoteTtsClient::new(remote_config)?))
        }
        "tone" => Ok(Arc::new(tone::ToneBackend::default())),
        _ => Err(anyhow!("Unknown TTS provider: {}", config.audio.provider)),
    }
}

pub mod remote;
pub mod tone;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        embeds: AtomicUsize,
        synths: AtomicUsize,
    }

    #[async_trait]
    impl SpeechBackend for CountingBackend {
        async fn embed(&self, waveform: &[f32], _: u32) -> Result<SpeakerEmbedding> {
            self.embeds.fetch_add(1, Ordering::SeqCst);
            Ok(SpeakerEmbedding(vec![waveform.len() as f32]))
        }

        async fn synthesize(
            &self,
            text: &str,
            speaker: &SpeakerEmbedding,
            _: &str,
        ) -> Result<AudioSegment> {
            self.synths.fetch_add(1, Ordering::SeqCst);
            Ok(AudioSegment::new(vec![speaker.0[0]; text.len()], 8000))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl SpeechBackend for BrokenBackend {
        async fn embed(&self, _: &[f32], _: u32) -> Result<SpeakerEmbedding> {
            Ok(SpeakerEmbedding(vec![0.0]))
        }

        async fn synthesize(&self, _: &str, _: &SpeakerEmbedding, _: &str) -> Result<AudioSegment> {
            Err(anyhow!("model crashed"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn voice(len: usize) -> Arc<VoiceProfile> {
        Arc::new(VoiceProfile::new(AudioSegment::new(vec![0.1; len], 16000)))
    }

    #[tokio::test]
    async fn test_embedding_computed_once_per_voice() -> StoryResult<()> {
        let backend = Arc::new(CountingBackend::default());
        let mut synth = SpeechSynthesizer::new(backend.clone(), "en-us");
        let narrator = voice(32);

        let a = synth.synthesize("Hello", &narrator).await?;
        let b = synth.synthesize("World!", &narrator).await?;
        assert_eq!(a.len(), 5);
        assert_eq!(b.len(), 6);
        assert_eq!(backend.embeds.load(Ordering::SeqCst), 1);
        assert_eq!(backend.synths.load(Ordering::SeqCst), 2);

        // Same content, different identity: embedded again.
        let clone = Arc::new((*narrator).clone());
        synth.synthesize("Again", &clone).await?;
        assert_eq!(backend.embeds.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_empty_inputs() {
        let backend = Arc::new(CountingBackend::default());
        let mut synth = SpeechSynthesizer::new(backend.clone(), "en-us");

        let err = synth.synthesize("   ", &voice(8)).await.unwrap_err();
        assert!(matches!(err, StoryError::InvalidParameter(_)));
        let err = synth.synthesize("text", &voice(0)).await.unwrap_err();
        assert!(matches!(err, StoryError::InvalidParameter(_)));
        assert_eq!(backend.embeds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_synthesis_error() {
        let mut synth = SpeechSynthesizer::new(Arc::new(BrokenBackend), "en-us");
        let err = synth.synthesize("text", &voice(8)).await.unwrap_err();
        assert!(matches!(err, StoryError::Synthesis(_)));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("model crashed"));
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = Config::default();
        config.audio.provider = "festival".to_string();
        assert!(create_speech_backend(&config).is_err());

        config.audio.provider = "remote".to_string();
        assert!(create_speech_backend(&config).is_err());

        config.audio.provider = "tone".to_string();
        assert_eq!(create_speech_backend(&config).unwrap().name(), "tone");
    }
}
