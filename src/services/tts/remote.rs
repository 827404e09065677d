use crate::services::tts::{SpeakerEmbedding, SpeechBackend};
use crate::utils::audio::{decode_wav, AudioSegment};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, Duration};
use url::Url;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteTtsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2
}

// --- Wire types ---

#[derive(Serialize)]
struct EmbedRequest<'a> {
    waveform: &'a [f32],
    sample_rate: u32,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    speaker_embedding: &'a [f32],
    language: &'a str,
}

// --- Client ---

/// Talks to a model server exposing `POST /embed` (JSON in, JSON out) and
/// `POST /synthesize` (JSON in, WAV bytes out).
pub struct RemoteTtsClient {
    config: RemoteTtsConfig,
    base: Url,
    client: Client,
}

impl RemoteTtsClient {
    pub fn new(config: RemoteTtsConfig) -> Result<Self> {
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url)
            .with_context(|| format!("Invalid remote TTS base_url: {}", config.base_url))?;

        Ok(Self {
            config,
            base,
            client: Client::new(),
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base
            .join(name)
            .with_context(|| format!("Failed to build {} endpoint", name))
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.retry_count + 1;
        let mut last_error = anyhow!("Unknown error");

        for attempt in 0..max_attempts {
            if attempt > 0 {
                warn!(
                    "Remote {} failed (attempt {}/{}), retrying...",
                    what,
                    attempt + 1,
                    max_attempts
                );
                sleep(Duration::from_secs(self.config.retry_delay_seconds)).await;
            }

            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Remote {} error: {:#}", what, e);
                    last_error = e;
                }
            }
        }

        Err(last_error.context(format!("Remote {} still failing after retries", what)))
    }

    async fn try_embed(&self, waveform: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding> {
        let url = self.endpoint("embed")?;
        let response = self
            .client
            .post(url)
            .json(&EmbedRequest {
                waveform,
                sample_rate,
            })
            .send()
            .await
            .context("Failed to send embed request")?
            .error_for_status()?
            .json::<EmbedResponse>()
            .await
            .context("Failed to parse embed response")?;

        if response.embedding.is_empty() {
            return Err(anyhow!("Server returned an empty speaker embedding"));
        }
        Ok(SpeakerEmbedding(response.embedding))
    }

    async fn try_synthesize(
        &self,
        text: &str,
        speaker: &SpeakerEmbedding,
        language: &str,
    ) -> Result<AudioSegment> {
        let url = self.endpoint("synthesize")?;
        let bytes = self
            .client
            .post(url)
            .json(&SynthesizeRequest {
                text,
                speaker_embedding: &speaker.0,
                language,
            })
            .send()
            .await
            .context("Failed to send synthesize request")?
            .error_for_status()?
            .bytes()
            .await
            .context("Failed to download synthesized audio")?;

        debug!("Received {} bytes of audio", bytes.len());
        decode_wav(&bytes).context("Server returned invalid WAV audio")
    }
}

#[async_trait]
impl SpeechBackend for RemoteTtsClient {
    async fn embed(&self, waveform: &[f32], sample_rate: u32) -> Result<SpeakerEmbedding> {
        self.with_retries("embed", move || self.try_embed(waveform, sample_rate))
            .await
    }

    async fn synthesize(
        &self,
        text: &str,
        speaker: &SpeakerEmbedding,
        language: &str,
    ) -> Result<AudioSegment> {
        self.with_retries("synthesis", move || self.try_synthesize(text, speaker, language))
            .await
    }

    fn name(&self) -> &str {
        "remote"
    }
}
