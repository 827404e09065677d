use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::tts::remote::RemoteTtsConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// YAML story graph. The built-in forest story is used when absent.
    #[serde(default)]
    pub story_file: Option<String>,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// WAV file used for voice cloning.
    #[serde(default)]
    pub voice_sample: Option<String>,

    #[serde(default = "default_ratio")]
    pub speaking_rate: f32,

    #[serde(default = "default_ratio")]
    pub pitch: f32,

    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    pub remote: Option<RemoteTtsConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            remote: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            story_file: None,
            output_folder: default_output(),
            language: default_language(),
            voice_sample: None,
            speaking_rate: default_ratio(),
            pitch: default_ratio(),
            audio: AudioConfig::default(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_language() -> String {
    "en-us".to_string()
}
fn default_ratio() -> f32 {
    1.0
}
fn default_tts_provider() -> String {
    "tone".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
