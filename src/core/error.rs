use thiserror::Error;

pub type StoryResult<T> = std::result::Result<T, StoryError>;

#[derive(Debug, Error)]
pub enum StoryError {
    /// Unknown node id. The graph is corrupt and the session cannot continue.
    #[error("story node not found: {0}")]
    NotFound(String),

    #[error("invalid choice {index}: node offers {available} option(s)")]
    InvalidChoice { index: i64, available: usize },

    #[error("choice on node '{from}' points to missing node '{target}'")]
    DanglingReference { from: String, target: String },

    #[error("speech synthesis failed: {0:#}")]
    Synthesis(#[source] anyhow::Error),

    #[error("session has ended")]
    SessionClosed,

    #[error("session has not been started")]
    NotStarted,

    #[error("session already started")]
    AlreadyStarted,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid story graph: {0}")]
    InvalidGraph(String),

    #[error("failed to persist session audio: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl StoryError {
    /// Whether the caller may retry or re-prompt with the session left as it was.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoryError::InvalidChoice { .. }
                | StoryError::Synthesis(_)
                | StoryError::InvalidParameter(_)
                | StoryError::Storage(_)
        )
    }
}
