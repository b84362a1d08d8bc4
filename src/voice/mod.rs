//! Voice processing module
//!
//! Device adapters (capture, playback), frame classification (VAD, wake
//! word), command endpointing, and the STT/TTS backends.

mod capture;
mod frame;
mod guard;
mod playback;
mod recorder;
mod stt;
mod tts;
mod vad;
mod wake_word;

pub use capture::{AudioCapture, FrameSource, list_devices};
pub use frame::{
    AudioFrame, SAMPLE_RATE, Waveform, calculate_rms, f32_to_i16, samples_for, samples_to_wav,
};
pub use guard::{PlaybackGuard, PlaybackOutcome};
pub use playback::{AudioPlayback, AudioSink};
pub use recorder::{
    CommandBuffer, EndpointRecorder, Recording, RecordingSettings, StopReason,
};
pub use stt::{AUDIO_PLACEHOLDER, SpeechToText, Transcriber};
pub use tts::{Synthesizer, TextToSpeech};
#[cfg(feature = "webrtc-vad")]
pub use vad::WebRtcVad;
pub use vad::{DEFAULT_ENERGY_THRESHOLD, EnergyVad, VoiceActivity};
pub use wake_word::{
    Detection, GateSettings, Scores, SpotterState, TranscriptSpotter, WakeGate, WakeModel,
};
