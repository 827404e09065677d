use crate::core::error::{StoryError, StoryResult};
use crate::core::io::Storage;
use crate::core::state::SessionWarning;
use crate::utils::audio::{encode_wav, AudioSegment};
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;

pub const SEGMENT_FILE: &str = "new_segment.wav";
pub const CUMULATIVE_FILE: &str = "generated_audio.wav";

/// Where one session writes its audio. The segment file is replaced on
/// every turn, the cumulative file grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPaths {
    pub segment: String,
    pub cumulative: String,
}

impl RecordingPaths {
    pub fn in_folder(folder: &Path) -> Self {
        Self {
            segment: folder.join(SEGMENT_FILE).to_string_lossy().to_string(),
            cumulative: folder.join(CUMULATIVE_FILE).to_string_lossy().to_string(),
        }
    }

    pub fn for_session(output_folder: &str, session_id: &str) -> Self {
        Self::in_folder(&Path::new(output_folder).join(session_id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub cumulative_samples: usize,
    pub warning: Option<SessionWarning>,
}

pub struct SessionRecorder {
    paths: RecordingPaths,
    storage: Arc<dyn Storage>,
    cumulative: Option<AudioSegment>,
}

impl SessionRecorder {
    pub fn new(paths: RecordingPaths, storage: Arc<dyn Storage>) -> Self {
        Self {
            paths,
            storage,
            cumulative: None,
        }
    }

    pub fn paths(&self) -> &RecordingPaths {
        &self.paths
    }

    pub fn cumulative(&self) -> Option<&AudioSegment> {
        self.cumulative.as_ref()
    }

    /// Appends a segment to the session recording and rewrites both
    /// artifact files. Nothing changes in memory unless both writes succeed.
    ///
    /// Segments must share the recording's sample rate. A segment at a new
    /// rate replaces everything recorded so far instead of being resampled,
    /// and the replacement is reported as a warning.
    pub async fn append(&mut self, segment: &AudioSegment) -> StoryResult<AppendOutcome> {
        let (combined, warning) = match &self.cumulative {
            None => (segment.clone(), None),
            Some(prev) if prev.sample_rate() != segment.sample_rate() => {
                warn!(
                    "Sample rate mismatch detected ({} Hz vs {} Hz). Restarting session audio.",
                    prev.sample_rate(),
                    segment.sample_rate()
                );
                (
                    segment.clone(),
                    Some(SessionWarning::SampleRateMismatch {
                        previous: prev.sample_rate(),
                        incoming: segment.sample_rate(),
                    }),
                )
            }
            Some(prev) => {
                let mut samples = Vec::with_capacity(prev.len() + segment.len());
                samples.extend_from_slice(prev.samples());
                samples.extend_from_slice(segment.samples());
                (AudioSegment::new(samples, prev.sample_rate()), None)
            }
        };

        self.persist(segment, &combined).await?;

        debug!(
            "Session audio now {:.1}s ({} samples)",
            combined.duration_secs(),
            combined.len()
        );
        let cumulative_samples = combined.len();
        self.cumulative = Some(combined);
        Ok(AppendOutcome {
            cumulative_samples,
            warning,
        })
    }

    async fn persist(&self, segment: &AudioSegment, combined: &AudioSegment) -> StoryResult<()> {
        let segment_wav = encode_wav(segment).map_err(StoryError::Storage)?;
        let combined_wav = encode_wav(combined).map_err(StoryError::Storage)?;

        self.storage
            .write(&self.paths.segment, &segment_wav)
            .await
            .map_err(StoryError::Storage)?;
        self.storage
            .write(&self.paths.cumulative, &combined_wav)
            .await
            .map_err(StoryError::Storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::utils::audio::decode_wav;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct ReadOnlyStorage;

    #[async_trait]
    impl Storage for ReadOnlyStorage {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            Err(anyhow!("no such file: {}", path))
        }
        async fn write(&self, _: &str, _: &[u8]) -> Result<()> {
            Err(anyhow!("disk is read-only"))
        }
    }

    fn segment(len: usize, value: f32, sample_rate: u32) -> AudioSegment {
        AudioSegment::new(vec![value; len], sample_rate)
    }

    #[tokio::test]
    async fn test_first_append_initializes() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let paths = RecordingPaths::in_folder(temp_dir.path());
        let mut recorder = SessionRecorder::new(paths.clone(), Arc::new(NativeStorage::new()));
        assert!(recorder.cumulative().is_none());

        let first = segment(100, 0.25, 16000);
        let outcome = recorder.append(&first).await?;
        assert_eq!(outcome.cumulative_samples, 100);
        assert!(outcome.warning.is_none());
        assert_eq!(recorder.cumulative(), Some(&first));

        let on_disk = decode_wav(&std::fs::read(&paths.segment)?)?;
        assert_eq!(on_disk, first);
        let on_disk = decode_wav(&std::fs::read(&paths.cumulative)?)?;
        assert_eq!(on_disk, first);
        Ok(())
    }

    #[tokio::test]
    async fn test_growth_is_monotonic() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let paths = RecordingPaths::in_folder(temp_dir.path());
        let mut recorder = SessionRecorder::new(paths.clone(), Arc::new(NativeStorage::new()));

        let mut previous = 0;
        for (i, len) in [100usize, 0, 37, 250].into_iter().enumerate() {
            let outcome = recorder.append(&segment(len, i as f32 * 0.1, 24000)).await?;
            assert_eq!(outcome.cumulative_samples, previous + len);
            previous = outcome.cumulative_samples;
        }

        let cumulative = decode_wav(&std::fs::read(&paths.cumulative)?)?;
        assert_eq!(cumulative.len(), 387);
        assert_eq!(cumulative.samples()[0], 0.0);
        assert!((cumulative.samples()[386] - 0.3).abs() < 1e-6);

        // The segment file only holds the latest turn.
        let last = decode_wav(&std::fs::read(&paths.segment)?)?;
        assert_eq!(last.len(), 250);
        Ok(())
    }

    #[tokio::test]
    async fn test_sample_rate_mismatch_restarts() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let paths = RecordingPaths::in_folder(temp_dir.path());
        let mut recorder = SessionRecorder::new(paths.clone(), Arc::new(NativeStorage::new()));

        recorder.append(&segment(500, 0.1, 16000)).await?;
        let incoming = segment(80, 0.2, 44100);
        let outcome = recorder.append(&incoming).await?;

        assert_eq!(outcome.cumulative_samples, 80);
        assert_eq!(
            outcome.warning,
            Some(SessionWarning::SampleRateMismatch {
                previous: 16000,
                incoming: 44100
            })
        );
        assert_eq!(recorder.cumulative(), Some(&incoming));
        let on_disk = decode_wav(&std::fs::read(&paths.cumulative)?)?;
        assert_eq!(on_disk.sample_rate(), 44100);
        assert_eq!(on_disk.len(), 80);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_failure_keeps_state() {
        let paths = RecordingPaths::for_session("out", "abc");
        assert!(paths.cumulative.ends_with(CUMULATIVE_FILE));
        let mut recorder = SessionRecorder::new(paths, Arc::new(ReadOnlyStorage));

        let err = recorder.append(&segment(10, 0.5, 8000)).await.unwrap_err();
        assert!(matches!(err, StoryError::Storage(_)));
        assert!(recorder.cumulative().is_none());
    }
}
