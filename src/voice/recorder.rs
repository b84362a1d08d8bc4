//! Command capture with silence endpointing

use std::time::Duration;

use super::capture::FrameSource;
use super::frame::{AudioFrame, SAMPLE_RATE, samples_for, samples_to_wav};
use super::vad::VoiceActivity;
use crate::{Error, Result};

/// Limits for one recording episode
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    /// Hard cap on the episode length
    pub max_duration: Duration,
    /// Consecutive non-speech needed to end the command
    pub silence_duration: Duration,
    /// Length of each classified frame
    pub frame_duration: Duration,
    /// Consecutive frame-read failures tolerated before giving up
    pub max_read_retries: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(10),
            silence_duration: Duration::from_millis(1500),
            frame_duration: Duration::from_millis(30),
            max_read_retries: 3,
        }
    }
}

impl RecordingSettings {
    /// Samples per frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the frame duration is zero or not a whole
    /// number of samples
    pub fn frame_samples(&self) -> Result<usize> {
        samples_for(self.frame_duration)
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                Error::Config(format!(
                    "frame duration {:?} is not a whole number of samples",
                    self.frame_duration
                ))
            })
    }

    /// Consecutive non-speech frames that end the episode
    #[must_use]
    pub fn silence_frames(&self) -> usize {
        frames_covering(self.silence_duration, self.frame_duration)
    }

    /// Frames after which the episode ends regardless of speech
    #[must_use]
    pub fn max_frames(&self) -> usize {
        frames_covering(self.max_duration, self.frame_duration)
    }
}

/// `ceil(total / frame)`, never less than one
fn frames_covering(total: Duration, frame: Duration) -> usize {
    let frame = frame.as_nanos().max(1);
    let count = total.as_nanos().div_ceil(frame).max(1);
    usize::try_from(count).unwrap_or(usize::MAX)
}

/// Why a recording episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Sustained silence after the command
    Silence,
    /// The duration cap was reached
    MaxDuration,
}

/// Frames accumulated during one recording episode
#[derive(Debug, Default)]
pub struct CommandBuffer {
    frames: Vec<AudioFrame>,
}

impl CommandBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Append a captured frame
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    /// Number of frames held
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing has been captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Concatenate the frames into one contiguous sample buffer
    #[must_use]
    pub fn seal(self) -> Vec<i16> {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }
}

/// A sealed command
#[derive(Debug, Clone)]
pub struct Recording {
    /// Contiguous mono 16 kHz samples
    pub samples: Vec<i16>,
    /// Frames captured
    pub frame_count: usize,
    /// Which condition ended the episode
    pub stop_reason: StopReason,
}

impl Recording {
    /// Length of the captured audio
    #[must_use]
    pub fn duration(&self) -> Duration {
        let len = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        Duration::from_millis(len.saturating_mul(1000) / u64::from(SAMPLE_RATE))
    }

    /// Encode as WAV bytes for the transcriber
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, SAMPLE_RATE)
    }
}

/// Captures a spoken command, ending on sustained silence or the duration cap
pub struct EndpointRecorder {
    vad: Box<dyn VoiceActivity>,
}

impl EndpointRecorder {
    /// Create a recorder using `vad` to classify frames
    #[must_use]
    pub fn new(vad: Box<dyn VoiceActivity>) -> Self {
        tracing::debug!(vad = vad.name(), "endpoint recorder initialized");
        Self { vad }
    }

    /// Record one command from `source`
    ///
    /// Opens the source, reads frames until the silence run or the frame cap
    /// is reached, then closes it. The silence run resets on every speech
    /// frame. A frame the classifier fails on counts as non-speech.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the source cannot be opened, or
    /// [`Error::Recording`] if consecutive read failures exceed the retry budget
    pub async fn record(
        &mut self,
        source: &mut dyn FrameSource,
        settings: &RecordingSettings,
    ) -> Result<Recording> {
        let frame_samples = settings.frame_samples()?;
        self.vad.reset();
        source.open()?;
        let result = self.capture(source, settings, frame_samples).await;
        source.close();
        result
    }

    async fn capture(
        &mut self,
        source: &mut dyn FrameSource,
        settings: &RecordingSettings,
        frame_samples: usize,
    ) -> Result<Recording> {
        let silence_frames = settings.silence_frames();
        let max_frames = settings.max_frames();

        tracing::info!(silence_frames, max_frames, "recording command");

        let mut buffer = CommandBuffer::new();
        let mut silent_run = 0usize;
        let mut failures = 0u32;

        let stop_reason = loop {
            if buffer.len() >= max_frames {
                break StopReason::MaxDuration;
            }

            let frame = match source.next_frame(frame_samples).await {
                Ok(frame) => {
                    failures = 0;
                    frame
                }
                Err(e) => {
                    failures += 1;
                    if failures > settings.max_read_retries {
                        return Err(Error::Recording(format!(
                            "{failures} consecutive frame reads failed, last: {e}"
                        )));
                    }
                    tracing::warn!(error = %e, failures, "dropped frame while recording");
                    continue;
                }
            };

            let speech = self.vad.is_speech(&frame).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "voice activity check failed, treating frame as silence");
                false
            });
            buffer.push(frame);

            if speech {
                silent_run = 0;
            } else {
                silent_run += 1;
                if silent_run >= silence_frames {
                    break StopReason::Silence;
                }
            }
        };

        let frame_count = buffer.len();
        tracing::info!(frames = frame_count, reason = ?stop_reason, "recording stopped");

        Ok(Recording {
            samples: buffer.seal(),
            frame_count,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;

    /// Frames of a fixed amplitude; `None` simulates a read failure
    struct Script {
        frames: VecDeque<Option<i16>>,
        opened: bool,
        reads: usize,
    }

    impl Script {
        fn new(frames: impl IntoIterator<Item = Option<i16>>) -> Self {
            Self {
                frames: frames.into_iter().collect(),
                opened: false,
                reads: 0,
            }
        }
    }

    #[async_trait(?Send)]
    impl FrameSource for Script {
        fn open(&mut self) -> Result<()> {
            self.opened = true;
            Ok(())
        }

        async fn next_frame(&mut self, size: usize) -> Result<AudioFrame> {
            self.reads += 1;
            match self.frames.pop_front() {
                Some(Some(level)) => Ok(AudioFrame::new(vec![level; size])),
                Some(None) => Err(Error::Device("read failed".to_string())),
                None => Ok(AudioFrame::new(vec![0; size])),
            }
        }

        fn drain(&mut self) {}

        fn close(&mut self) {
            self.opened = false;
        }

        fn is_open(&self) -> bool {
            self.opened
        }
    }

    fn recorder() -> EndpointRecorder {
        EndpointRecorder::new(Box::new(crate::voice::EnergyVad::default()))
    }

    const SPEECH: Option<i16> = Some(12000);
    const SILENCE: Option<i16> = Some(0);

    #[test]
    fn test_frame_counts_round_up() {
        let settings = RecordingSettings {
            max_duration: Duration::from_millis(100),
            silence_duration: Duration::from_millis(61),
            frame_duration: Duration::from_millis(30),
            max_read_retries: 0,
        };
        assert_eq!(settings.max_frames(), 4);
        assert_eq!(settings.silence_frames(), 3);
        assert_eq!(settings.frame_samples().unwrap(), 480);

        let defaults = RecordingSettings::default();
        assert_eq!(defaults.silence_frames(), 50);
        assert_eq!(defaults.max_frames(), 334);
    }

    #[tokio::test]
    async fn test_stops_exactly_after_silence_run() {
        let settings = RecordingSettings::default();
        let needed = settings.silence_frames();
        let mut source = Script::new(
            std::iter::repeat_n(SPEECH, 7).chain(std::iter::repeat_n(SILENCE, needed + 20)),
        );

        let recording = recorder().record(&mut source, &settings).await.unwrap();
        assert_eq!(recording.stop_reason, StopReason::Silence);
        assert_eq!(recording.frame_count, 7 + needed);
        assert_eq!(recording.samples.len(), (7 + needed) * 480);
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn test_speech_resets_silence_run() {
        let settings = RecordingSettings {
            silence_duration: Duration::from_millis(90),
            ..RecordingSettings::default()
        };
        let mut source = Script::new([
            SPEECH, SILENCE, SILENCE, SPEECH, SILENCE, SILENCE, SILENCE, SPEECH,
        ]);

        let recording = recorder().record(&mut source, &settings).await.unwrap();
        assert_eq!(recording.stop_reason, StopReason::Silence);
        assert_eq!(recording.frame_count, 7);
    }

    #[tokio::test]
    async fn test_duration_cap() {
        let settings = RecordingSettings {
            max_duration: Duration::from_millis(100),
            ..RecordingSettings::default()
        };
        let mut source = Script::new(std::iter::repeat_n(SPEECH, 50));

        let recording = recorder().record(&mut source, &settings).await.unwrap();
        assert_eq!(recording.stop_reason, StopReason::MaxDuration);
        assert_eq!(recording.frame_count, 4);
        assert_eq!(source.reads, 4);
    }

    #[tokio::test]
    async fn test_single_dropped_frame_is_skipped() {
        let settings = RecordingSettings {
            max_duration: Duration::from_millis(150),
            ..RecordingSettings::default()
        };
        let mut source = Script::new([SPEECH, None, SPEECH, None, None, SPEECH, SPEECH, SPEECH]);

        let recording = recorder().record(&mut source, &settings).await.unwrap();
        assert_eq!(recording.stop_reason, StopReason::MaxDuration);
        assert_eq!(recording.frame_count, 5);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let settings = RecordingSettings {
            max_read_retries: 2,
            ..RecordingSettings::default()
        };
        let mut source = Script::new([SPEECH, None, None, None, SPEECH]);

        let err = recorder().record(&mut source, &settings).await.unwrap_err();
        assert!(matches!(err, Error::Recording(_)));
        assert!(!source.is_open());
    }

    #[test]
    fn test_seal_concatenates_in_order() {
        let mut buffer = CommandBuffer::new();
        buffer.push(AudioFrame::new(vec![1, 2]));
        buffer.push(AudioFrame::new(vec![3]));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.seal(), vec![1, 2, 3]);
    }
}
