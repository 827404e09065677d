use crate::core::config::Config;
use crate::core::error::{StoryError, StoryResult};
use crate::core::io::Storage;
use crate::core::state::{SessionState, SessionStatus, SessionWarning};
use crate::services::effects::{AudioEffectsProcessor, EffectParams};
use crate::services::recorder::{RecordingPaths, SessionRecorder};
use crate::services::story::{StoryGraph, StoryNode};
use crate::services::tts::{SpeechBackend, SpeechSynthesizer, VoiceProfile};
use crate::utils::audio::AudioSegment;
use log::{info, warn};
use std::sync::Arc;

/// Choice index that ends the session instead of following a choice.
pub const END_SENTINEL: i64 = -1;

pub const END_MESSAGE: &str = "Story ended. Here is the full audio of your adventure.";

/// Result of narrating one node.
#[derive(Debug, Clone)]
pub struct NodeVisit {
    pub node_id: String,
    pub text: String,
    pub emotion: String,
    /// Empty when the node ends the story.
    pub options: Vec<String>,
    pub segment: AudioSegment,
    pub warnings: Vec<SessionWarning>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Visited(NodeVisit),
    /// The session is over; carries everything recorded.
    Ended(Option<AudioSegment>),
}

/// What the surrounding UI needs to render a turn. Audio is handed over
/// by path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryTurn {
    pub text: String,
    pub node_id: String,
    pub option_labels: Vec<String>,
    pub audio_path: Option<String>,
    pub warnings: Vec<SessionWarning>,
    pub ended: bool,
}

pub fn new_session_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// One listener's walk through a story.
///
/// Every mutating call takes `&mut self`, so a session runs its turns one
/// at a time. Sessions share only the graph and the backend.
pub struct StorySession {
    id: String,
    graph: Arc<StoryGraph>,
    synthesizer: SpeechSynthesizer,
    effects: AudioEffectsProcessor,
    recorder: SessionRecorder,
    voice: Option<Arc<VoiceProfile>>,
    state: SessionState,
}

impl StorySession {
    pub fn new(
        id: impl Into<String>,
        graph: Arc<StoryGraph>,
        synthesizer: SpeechSynthesizer,
        recorder: SessionRecorder,
    ) -> Self {
        Self {
            id: id.into(),
            graph,
            synthesizer,
            effects: AudioEffectsProcessor::default(),
            recorder,
            voice: None,
            state: SessionState::default(),
        }
    }

    /// Session with a fresh id whose audio goes to `<output_folder>/<id>/`.
    pub fn create(
        config: &Config,
        graph: Arc<StoryGraph>,
        backend: Arc<dyn SpeechBackend>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let id = new_session_id();
        let paths = RecordingPaths::for_session(&config.output_folder, &id);
        info!("Session {} records to {}", id, paths.cumulative);
        Self::new(
            id,
            graph,
            SpeechSynthesizer::new(backend, config.language.clone()),
            SessionRecorder::new(paths, storage),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.state.current_node_id.as_deref()
    }

    pub fn cumulative_audio(&self) -> Option<&AudioSegment> {
        self.recorder.cumulative()
    }

    pub fn recording_paths(&self) -> &RecordingPaths {
        self.recorder.paths()
    }

    pub async fn start(
        &mut self,
        voice: Option<Arc<VoiceProfile>>,
        speaking_rate: f32,
        pitch: f32,
    ) -> StoryResult<NodeVisit> {
        match self.state.status {
            SessionStatus::NotStarted => {}
            SessionStatus::InProgress => return Err(StoryError::AlreadyStarted),
            SessionStatus::Ended => return Err(StoryError::SessionClosed),
        }
        let voice = voice.filter(|v| !v.is_empty()).ok_or_else(|| {
            StoryError::InvalidParameter("a voice sample is required to start the story".to_string())
        })?;
        let params = EffectParams::new(speaking_rate, pitch)?;

        let graph = self.graph.clone();
        let node = graph.start_node()?;
        let visit = self.narrate(node, &voice, params).await?;

        self.voice = Some(voice);
        self.state = SessionState {
            status: SessionStatus::InProgress,
            current_node_id: Some(node.id.clone()),
            params,
        };
        Ok(visit)
    }

    /// Follows option `choice_index` of the current node, or ends the
    /// session for `END_SENTINEL`.
    pub async fn advance(&mut self, choice_index: i64) -> StoryResult<Step> {
        if choice_index == END_SENTINEL {
            return Ok(Step::Ended(self.end()));
        }
        let voice = self.active_voice()?;
        let params = self.state.params;
        self.advance_with(choice_index, voice, params).await
    }

    /// Ends the session and returns the full recording. Calling it again
    /// returns the same recording.
    pub fn end(&mut self) -> Option<AudioSegment> {
        if self.state.status != SessionStatus::Ended {
            info!("Session {} ended", self.id);
            self.state.status = SessionStatus::Ended;
        }
        self.recorder.cumulative().cloned()
    }

    pub async fn start_story(
        &mut self,
        voice: Option<Arc<VoiceProfile>>,
        speaking_rate: f32,
        pitch: f32,
    ) -> StoryResult<StoryTurn> {
        let visit = self.start(voice, speaking_rate, pitch).await?;
        Ok(self.visit_turn(visit))
    }

    /// Turn-based entry point for a UI that re-sends its controls every
    /// turn: the node it believes is current, the voice, and the effect
    /// settings, which apply from this turn on.
    pub async fn advance_story(
        &mut self,
        choice_index: i64,
        current_node_id: &str,
        voice: Option<Arc<VoiceProfile>>,
        speaking_rate: f32,
        pitch: f32,
    ) -> StoryResult<StoryTurn> {
        if choice_index == END_SENTINEL {
            self.end();
            return Ok(self.end_turn());
        }
        match self.state.status {
            SessionStatus::NotStarted => return Err(StoryError::NotStarted),
            SessionStatus::Ended => return Err(StoryError::SessionClosed),
            SessionStatus::InProgress => {}
        }
        if self.current_node_id() != Some(current_node_id) {
            return Err(StoryError::InvalidParameter(format!(
                "caller is at node '{}' but the session is at '{}'",
                current_node_id,
                self.current_node_id().unwrap_or_default()
            )));
        }

        let voice = match voice.filter(|v| !v.is_empty()) {
            Some(v) => v,
            None => self.active_voice()?,
        };
        let params = EffectParams::new(speaking_rate, pitch)?;

        match self.advance_with(choice_index, voice, params).await? {
            Step::Visited(visit) => Ok(self.visit_turn(visit)),
            Step::Ended(_) => Ok(self.end_turn()),
        }
    }

    fn active_voice(&self) -> StoryResult<Arc<VoiceProfile>> {
        match self.state.status {
            SessionStatus::NotStarted => Err(StoryError::NotStarted),
            SessionStatus::Ended => Err(StoryError::SessionClosed),
            SessionStatus::InProgress => self.voice.clone().ok_or(StoryError::NotStarted),
        }
    }

    async fn advance_with(
        &mut self,
        choice_index: i64,
        voice: Arc<VoiceProfile>,
        params: EffectParams,
    ) -> StoryResult<Step> {
        match self.state.status {
            SessionStatus::NotStarted => return Err(StoryError::NotStarted),
            SessionStatus::Ended => return Err(StoryError::SessionClosed),
            SessionStatus::InProgress => {}
        }

        let graph = self.graph.clone();
        let current_id = self
            .state
            .current_node_id
            .clone()
            .ok_or(StoryError::NotStarted)?;
        let current = match graph.get(&current_id) {
            Ok(node) => node,
            Err(e) => {
                warn!("Current node '{}' vanished from the story, ending session", current_id);
                self.state.status = SessionStatus::Ended;
                return Err(e);
            }
        };

        let choice = usize::try_from(choice_index)
            .ok()
            .and_then(|i| current.options.get(i))
            .ok_or(StoryError::InvalidChoice {
                index: choice_index,
                available: current.options.len(),
            })?;

        let next = match graph.get(&choice.target_node_id) {
            Ok(node) => node,
            Err(_) => {
                warn!(
                    "Choice '{}' leads to missing node '{}', ending story",
                    choice.label, choice.target_node_id
                );
                self.state.status = SessionStatus::Ended;
                return Err(StoryError::DanglingReference {
                    from: current_id,
                    target: choice.target_node_id.clone(),
                });
            }
        };

        let visit = self.narrate(next, &voice, params).await?;

        self.voice = Some(voice);
        self.state.params = params;
        self.state.current_node_id = Some(next.id.clone());
        Ok(Step::Visited(visit))
    }

    /// Synthesizes, processes, and records one node. Leaves the session
    /// untouched on failure.
    async fn narrate(
        &mut self,
        node: &StoryNode,
        voice: &Arc<VoiceProfile>,
        params: EffectParams,
    ) -> StoryResult<NodeVisit> {
        info!("Narrating node '{}' (mood: {})", node.id, node.emotion);

        let raw = self.synthesizer.synthesize(&node.text, voice).await?;
        let segment = self.effects.apply(raw, &params)?;

        let mut warnings = Vec::new();
        if params.is_degenerate_rate() {
            warnings.push(SessionWarning::DegenerateSpeakingRate(params.speaking_rate));
        }
        let outcome = self.recorder.append(&segment).await?;
        warnings.extend(outcome.warning);

        Ok(NodeVisit {
            node_id: node.id.clone(),
            text: node.text.clone(),
            emotion: node.emotion.clone(),
            options: node.option_labels(),
            segment,
            warnings,
        })
    }

    fn visit_turn(&self, visit: NodeVisit) -> StoryTurn {
        StoryTurn {
            text: visit.text,
            node_id: visit.node_id,
            option_labels: visit.options,
            audio_path: Some(self.recorder.paths().segment.clone()),
            warnings: visit.warnings,
            ended: false,
        }
    }

    fn end_turn(&self) -> StoryTurn {
        StoryTurn {
            text: END_MESSAGE.to_string(),
            node_id: self
                .current_node_id()
                .unwrap_or(self.graph.start_id())
                .to_string(),
            option_labels: Vec::new(),
            audio_path: self
                .recorder
                .cumulative()
                .map(|_| self.recorder.paths().cumulative.clone()),
            warnings: Vec::new(),
            ended: true,
        }
    }
}
