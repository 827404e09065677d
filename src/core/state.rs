use serde::{Deserialize, Serialize};

use crate::services::effects::EffectParams;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    NotStarted,
    InProgress,
    Ended,
}

/// Traversal state of one session. The cumulative recording lives in the
/// session's `SessionRecorder`, which the session owns exclusively.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub current_node_id: Option<String>,
    pub params: EffectParams,
}

/// Non-fatal conditions reported alongside a successful turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum SessionWarning {
    /// The recorder dropped everything recorded so far and restarted from
    /// the newest segment.
    SampleRateMismatch { previous: u32, incoming: u32 },
    DegenerateSpeakingRate(f32),
}

impl std::fmt::Display for SessionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionWarning::SampleRateMismatch { previous, incoming } => write!(
                f,
                "sample rate changed from {} Hz to {} Hz, earlier session audio was discarded",
                previous, incoming
            ),
            SessionWarning::DegenerateSpeakingRate(rate) => {
                write!(f, "speaking rate {} is far from 1.0, output may be degraded", rate)
            }
        }
    }
}
