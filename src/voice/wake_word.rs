//! Wake word detection
//!
//! The [`WakeGate`] scores frames from a [`FrameSource`] against the configured
//! wake labels until one crosses the threshold. Scoring itself is delegated to
//! a [`WakeModel`]; [`TranscriptSpotter`] is the bundled model, a hybrid of
//! local energy segmentation and transcript verification.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::capture::FrameSource;
use super::frame::{AudioFrame, SAMPLE_RATE, samples_to_wav};
use super::stt::Transcriber;
use super::vad::VoiceActivity;
use crate::{Error, Result};

/// Per-label confidence scores produced by a [`WakeModel`]
pub type Scores = HashMap<String, f32>;

/// Scores audio frames against wake labels
///
/// Implementations carry running state across frames; [`WakeModel::reset`]
/// must clear all of it.
#[async_trait(?Send)]
pub trait WakeModel {
    /// Score one frame, returning a confidence in `[0, 1]` per label
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scoring`] if inference fails for this frame
    async fn predict(&mut self, frame: &AudioFrame) -> Result<Scores>;

    /// Clear all per-label running state
    fn reset(&mut self);

    /// Whether the model segments speech on its own energy gate
    ///
    /// Such models report on the silent frame that closes a segment, so a
    /// voice-activity pre-filter would zero every detection.
    fn self_segmenting(&self) -> bool {
        false
    }
}

/// Gate settings
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Wake labels in evaluation order (ties go to the earliest)
    pub labels: Vec<String>,
    /// Samples per scored frame
    pub frame_samples: usize,
    /// Frames read and discarded after the source opens
    pub warmup_frames: usize,
}

/// A wake label that crossed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Detected label
    pub label: String,
    /// Confidence that met the threshold
    pub confidence: f32,
    /// Frames scored in this listening cycle, including the detecting one
    pub frames_scored: usize,
}

/// Gates the assistant on wake-word detection
pub struct WakeGate {
    model: Box<dyn WakeModel>,
    prefilter: Option<Box<dyn VoiceActivity>>,
    settings: GateSettings,
}

impl WakeGate {
    /// Create a gate over a scoring model
    #[must_use]
    pub fn new(model: Box<dyn WakeModel>, settings: GateSettings) -> Self {
        tracing::debug!(labels = ?settings.labels, "wake gate initialized");
        Self {
            model,
            prefilter: None,
            settings,
        }
    }

    /// Suppress scores on frames the classifier marks as non-speech
    ///
    /// Ignored for self-segmenting models, see [`WakeModel::self_segmenting`].
    #[must_use]
    pub fn with_prefilter(mut self, vad: Box<dyn VoiceActivity>) -> Self {
        if self.model.self_segmenting() {
            tracing::warn!("wake model segments its own speech, ignoring pre-filter");
            return self;
        }
        self.prefilter = Some(vad);
        self
    }

    /// Whether a pre-filter is applied to scores
    #[must_use]
    pub const fn has_prefilter(&self) -> bool {
        self.prefilter.is_some()
    }

    /// Configured labels in evaluation order
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.settings.labels
    }

    /// Clear all model and pre-filter state
    pub fn reset(&mut self) {
        self.model.reset();
        if let Some(vad) = self.prefilter.as_mut() {
            vad.reset();
        }
    }

    /// Score a frame against every configured label, in label order
    ///
    /// A model failure is logged and scores zero for every label.
    pub async fn score(&mut self, frame: &AudioFrame) -> Vec<(String, f32)> {
        let scores = match self.model.predict(frame).await {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(error = %e, "wake scoring failed, treating frame as silent");
                Scores::new()
            }
        };

        let speech = match self.prefilter.as_mut() {
            Some(vad) => vad.is_speech(frame).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "wake pre-filter failed, treating frame as non-speech");
                false
            }),
            None => true,
        };

        self.settings
            .labels
            .iter()
            .map(|label| {
                let score = if speech {
                    scores.get(label).copied().unwrap_or(0.0).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (label.clone(), score)
            })
            .collect()
    }

    /// Listen until any label's confidence meets `threshold`
    ///
    /// Resets the model, opens the source, discards the warm-up frames, then
    /// scores frames. The source is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the source fails
    pub async fn listen_until_detected(
        &mut self,
        source: &mut dyn FrameSource,
        threshold: f32,
    ) -> Result<Detection> {
        self.reset();
        let result = self.listen(source, threshold).await;
        source.close();
        result
    }

    async fn listen(&mut self, source: &mut dyn FrameSource, threshold: f32) -> Result<Detection> {
        let size = self.settings.frame_samples;
        source.open()?;

        tracing::debug!(frames = self.settings.warmup_frames, "flushing audio buffers");
        for _ in 0..self.settings.warmup_frames {
            source.next_frame(size).await?;
        }

        tracing::info!("listening for wake word");
        let mut frames_scored = 0;
        loop {
            let frame = source.next_frame(size).await?;
            frames_scored += 1;

            let scores = self.score(&frame).await;
            tracing::trace!(?scores, "wake scores");

            if let Some((label, confidence)) = scores.into_iter().find(|(_, s)| *s >= threshold) {
                tracing::info!(label, confidence, "wake word detected");
                return Ok(Detection {
                    label,
                    confidence,
                    frames_scored,
                });
            }
        }
    }
}

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to verify (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest segment sent for verification (in samples)
const MAX_SEGMENT_SAMPLES: usize = SAMPLE_RATE as usize * 3;

/// State of the transcript spotter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotterState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Wake model that verifies energy-segmented utterances with STT
///
/// Frames score zero until a speech segment ends; the segment is then
/// transcribed and every label whose phrase appears in the transcript scores
/// `1.0` for that frame.
pub struct TranscriptSpotter {
    transcriber: Arc<dyn Transcriber>,
    phrases: Vec<(String, String)>,
    state: SpotterState,
    speech_buffer: Vec<i16>,
    silence_counter: usize,
}

impl TranscriptSpotter {
    /// Create a spotter for the given labels
    ///
    /// Labels double as the phrases searched for (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty label is given
    pub fn new(labels: &[String], transcriber: Arc<dyn Transcriber>) -> Result<Self> {
        let phrases: Vec<(String, String)> = labels
            .iter()
            .map(|label| (label.clone(), label.to_lowercase().trim().to_string()))
            .filter(|(_, phrase)| !phrase.is_empty())
            .collect();

        if phrases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }

        tracing::debug!(phrases = ?phrases, "transcript spotter initialized");

        Ok(Self {
            transcriber,
            phrases,
            state: SpotterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        })
    }

    /// Feed a frame; returns the finished segment once speech is followed by silence
    fn process(&mut self, frame: &AudioFrame) -> Option<Vec<i16>> {
        let energy = frame.rms();
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SpotterState::Idle => {
                if is_speech {
                    self.state = SpotterState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(frame.samples());
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            SpotterState::Listening => {
                self.speech_buffer.extend_from_slice(frame.samples());

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += frame.len();
                }

                if self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(segment);
                }

                if self.silence_counter > SILENCE_SAMPLES * 2
                    || self.speech_buffer.len() > MAX_SEGMENT_SAMPLES
                {
                    tracing::trace!("segment abandoned - resetting");
                    self.reset();
                }
            }
        }

        None
    }

    /// Labels whose phrase appears in the transcript
    fn match_labels(&self, transcript: &str) -> Scores {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .filter(|(_, phrase)| normalized.contains(phrase.as_str()))
            .map(|(label, _)| (label.clone(), 1.0))
            .collect()
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SpotterState {
        self.state
    }

    /// Get the accumulated speech buffer
    #[must_use]
    pub fn speech_buffer(&self) -> &[i16] {
        &self.speech_buffer
    }
}

#[async_trait(?Send)]
impl WakeModel for TranscriptSpotter {
    async fn predict(&mut self, frame: &AudioFrame) -> Result<Scores> {
        let Some(segment) = self.process(frame) else {
            return Ok(Scores::new());
        };

        let wav = samples_to_wav(&segment, SAMPLE_RATE)?;
        let transcript = self
            .transcriber
            .transcribe(&wav)
            .await
            .map_err(|e| Error::Scoring(format!("wake verification failed: {e}")))?;

        let scores = self.match_labels(&transcript);
        tracing::debug!(transcript, matched = scores.len(), "wake segment verified");
        Ok(scores)
    }

    fn reset(&mut self) {
        self.state = SpotterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    fn self_segmenting(&self) -> bool {
        true
    }
}
