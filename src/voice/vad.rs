//! Voice activity detection
//!
//! Per-frame speech / non-speech classification used by the endpoint
//! recorder and, optionally, as a pre-filter in front of wake-word scoring.

use crate::Result;

use super::frame::AudioFrame;

/// Default RMS energy above which a frame counts as speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Classifies single frames as speech or non-speech
pub trait VoiceActivity: Send {
    /// Classify one frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Scoring`] if the classifier cannot evaluate the frame
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool>;

    /// Clear any state carried between frames
    fn reset(&mut self);

    /// Classifier name for logging
    fn name(&self) -> &'static str;
}

/// RMS energy gate
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create an energy gate with the given RMS threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_THRESHOLD)
    }
}

impl VoiceActivity for EnergyVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
        let energy = frame.rms();
        tracing::trace!(energy, threshold = self.threshold, "energy vad");
        Ok(energy > self.threshold)
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy"
    }
}

#[cfg(feature = "webrtc-vad")]
pub use webrtc::WebRtcVad;

#[cfg(feature = "webrtc-vad")]
mod webrtc {
    use earshot::{VoiceActivityDetector, VoiceActivityProfile};

    use super::VoiceActivity;
    use crate::voice::frame::AudioFrame;
    use crate::{Error, Result};

    /// WebRTC-style classifier backed by `earshot`
    ///
    /// Accepts 10, 20 or 30 ms frames at 16 kHz.
    pub struct WebRtcVad {
        detector: VoiceActivityDetector,
    }

    impl WebRtcVad {
        /// Create a classifier; `aggressiveness` follows the WebRTC 0..=3 scale
        #[must_use]
        pub fn new(aggressiveness: u8) -> Self {
            Self {
                detector: VoiceActivityDetector::new(profile_for(aggressiveness)),
            }
        }
    }

    fn profile_for(aggressiveness: u8) -> VoiceActivityProfile {
        match aggressiveness {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        }
    }

    impl VoiceActivity for WebRtcVad {
        fn is_speech(&mut self, frame: &AudioFrame) -> Result<bool> {
            self.detector.predict_16khz(frame.samples()).map_err(|_| {
                Error::Scoring(format!(
                    "vad rejected frame of {} samples (expects 160, 320 or 480)",
                    frame.len()
                ))
            })
        }

        fn reset(&mut self) {
            self.detector.reset();
        }

        fn name(&self) -> &'static str {
            "webrtc"
        }
    }
}
