use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Select;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use voxvoyage::core::config::{Config, DEFAULT_CONFIG_PATH};
use voxvoyage::core::error::StoryResult;
use voxvoyage::core::io::{NativeStorage, Storage};
use voxvoyage::services::session::{StorySession, StoryTurn, END_SENTINEL};
use voxvoyage::services::story::StoryGraph;
use voxvoyage::services::tts::{create_speech_backend, VoiceProfile};

const QUIT_LABEL: &str = "[Quit story]";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config, then let command-line flags override it
    let overrides = Overrides::parse(std::env::args().skip(1))?;
    let mut config = load_config(&overrides.config_path)?;
    overrides.apply(&mut config)?;
    config.ensure_directories()?;

    // 2. Story graph
    let graph = match &config.story_file {
        Some(path) => StoryGraph::load(Path::new(path))?,
        None => StoryGraph::builtin()?,
    };
    let graph = Arc::new(graph);

    // 3. Voice sample
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let voice_path = config.voice_sample.clone().ok_or_else(|| {
        anyhow!("Please provide a voice sample (voice_sample in config.yml or --voice <file.wav>).")
    })?;
    let voice_bytes = storage
        .read(&voice_path)
        .await
        .with_context(|| format!("Failed to read voice sample {}", voice_path))?;
    let voice = Arc::new(VoiceProfile::from_wav(&voice_bytes)?);

    // 4. Session
    let backend = create_speech_backend(&config)?;
    let mut session = StorySession::create(&config, graph, backend, storage);
    let (rate, pitch) = (config.speaking_rate, config.pitch);

    let mut turn = with_spinner(
        "Narrating...",
        session.start_story(Some(voice.clone()), rate, pitch),
    )
    .await?;

    loop {
        print_turn(&turn);
        if turn.ended {
            break;
        }

        let choice = if turn.option_labels.is_empty() {
            println!("\n~ The End ~");
            END_SENTINEL
        } else {
            prompt_choice(&turn.option_labels)?
        };

        let result = with_spinner(
            "Narrating...",
            session.advance_story(choice, &turn.node_id, Some(voice.clone()), rate, pitch),
        )
        .await;

        match result {
            Ok(next) => turn = next,
            Err(e) if e.is_recoverable() => {
                eprintln!("{}", e);
            }
            Err(e) => {
                eprintln!("{}", e);
                let last = session
                    .advance_story(END_SENTINEL, &turn.node_id, None, rate, pitch)
                    .await?;
                print_turn(&last);
                break;
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        log::info!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
        return Ok(Config::default());
    }
    Config::load_from(path)
}

async fn with_spinner<T>(message: &str, fut: impl Future<Output = StoryResult<T>>) -> StoryResult<T> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    let result = fut.await;
    pb.finish_and_clear();
    result
}

fn print_turn(turn: &StoryTurn) {
    println!("\n{}\n", turn.text);
    for warning in &turn.warnings {
        eprintln!("warning: {}", warning);
    }
    if let Some(path) = &turn.audio_path {
        if turn.ended {
            println!("Full session audio: {}", path);
        } else {
            println!("Audio: {}", path);
        }
    }
}

fn prompt_choice(labels: &[String]) -> Result<i64> {
    let mut options = labels.to_vec();
    options.push(QUIT_LABEL.to_string());

    let selection = Select::new("What do you do?", options).raw_prompt()?;
    if selection.index == labels.len() {
        Ok(END_SENTINEL)
    } else {
        Ok(selection.index as i64)
    }
}

/// Command-line overrides for the most common config fields.
struct Overrides {
    config_path: PathBuf,
    voice: Option<String>,
    story: Option<String>,
    rate: Option<f32>,
    pitch: Option<f32>,
}

impl Overrides {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut overrides = Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            voice: None,
            story: None,
            rate: None,
            pitch: None,
        };

        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .ok_or_else(|| anyhow!("Missing value for {}", flag))
            };
            match flag.as_str() {
                "--config" => overrides.config_path = PathBuf::from(value()?),
                "--voice" => overrides.voice = Some(value()?),
                "--story" => overrides.story = Some(value()?),
                "--rate" => overrides.rate = Some(value()?.parse().context("Invalid --rate")?),
                "--pitch" => overrides.pitch = Some(value()?.parse().context("Invalid --pitch")?),
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {}\nUsage: voxvoyage [--config config.yml] [--voice sample.wav] [--story story.yml] [--rate 1.0] [--pitch 1.0]",
                        other
                    ))
                }
            }
        }
        Ok(overrides)
    }

    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(voice) = &self.voice {
            config.voice_sample = Some(voice.clone());
        }
        if let Some(story) = &self.story {
            config.story_file = Some(story.clone());
        }
        if let Some(rate) = self.rate {
            config.speaking_rate = rate;
        }
        if let Some(pitch) = self.pitch {
            config.pitch = pitch;
        }
        voxvoyage::services::effects::EffectParams::new(config.speaking_rate, config.pitch)?;
        Ok(())
    }
}
