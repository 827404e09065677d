pub mod effects;
pub mod recorder;
pub mod session;
pub mod story;
pub mod tts;
