//! Configuration management for the voice relay

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reasoner::{CommandReasoner, DEFAULT_QUERY_TIMEOUT};
use crate::session::DEFAULT_CONVERSATION_TIMEOUT;
use crate::voice::{DEFAULT_ENERGY_THRESHOLD, RecordingSettings};
use crate::{Error, Result};

use self::file::RelayConfigFile;

/// Known speech-to-text providers
pub const STT_PROVIDERS: &[&str] = &["whisper", "deepgram", "command"];

/// Known text-to-speech providers
pub const TTS_PROVIDERS: &[&str] = &["openai", "elevenlabs", "piper"];

/// Known voice-activity classifiers
pub const VAD_KINDS: &[&str] = &["webrtc", "energy"];

/// Voice relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Wake-word gate
    pub wake: WakeConfig,

    /// Command recording limits
    pub recording: RecordingSettings,

    /// Frame classifier
    pub vad: VadConfig,

    /// Inactivity after which a new conversation starts
    pub conversation_timeout: Duration,

    /// Devices and playback
    pub audio: AudioConfig,

    /// Speech-to-text backend
    pub stt: SttConfig,

    /// Text-to-speech backend
    pub tts: TtsConfig,

    /// Reasoning command
    pub reasoner: ReasonerConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Wake-word configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Wake phrases, evaluated in this order
    pub words: Vec<String>,

    /// Detection threshold in `[0, 1]`
    pub threshold: f32,

    /// Samples per scored frame (1280 = 80 ms)
    pub frame_samples: usize,

    /// Frames discarded after the microphone opens, covering device start-up
    /// buffering
    pub warmup_frames: usize,

    /// Zero wake scores on frames the VAD calls non-speech
    pub prefilter: bool,
}

/// Voice-activity classifier configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// "webrtc" or "energy"
    pub kind: String,

    /// WebRTC aggressiveness, 0 (least) to 3 (most)
    pub aggressiveness: u8,

    /// RMS threshold for the energy classifier
    pub energy_threshold: f32,
}

/// Audio device configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name (system default when unset)
    pub input_device: Option<String>,

    /// Output device name (system default when unset)
    pub output_device: Option<String>,

    /// WAV played on wake
    pub notification_sound: Option<PathBuf>,

    /// Pause after any playback before the microphone reopens
    pub settle_delay: Duration,

    /// Extra time past a waveform's length before playback is abandoned
    pub playback_grace: Duration,
}

/// STT configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// "whisper", "deepgram" or "command"
    pub provider: String,

    /// Model for the API providers
    pub model: String,

    /// Language hint for Whisper
    pub language: Option<String>,

    /// Program and arguments for the command provider
    pub command: Vec<String>,
}

/// TTS configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// "openai", "elevenlabs" or "piper"
    pub provider: String,

    /// Model for the API providers
    pub model: String,

    /// Voice (`OpenAI` voice name or `ElevenLabs` voice id)
    pub voice: String,

    /// Speed multiplier for `OpenAI` (0.25 to 4.0)
    pub speed: f32,

    /// Piper executable
    pub piper_program: String,

    /// Piper voice model (`.onnx`)
    pub piper_model: Option<PathBuf>,
}

/// Reasoner configuration
#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    /// Executable
    pub program: String,

    /// Arguments with `{prompt}` and `{session}` placeholders
    pub args: Vec<String>,

    /// Upper bound per query
    pub timeout: Duration,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(RelayConfigFile::default(), |_| None)
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be loaded
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        Ok(Self::from_sources(fc, |key| std::env::var(key).ok()))
    }

    /// Resolve configuration from a parsed file and an environment lookup
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(fc: RelayConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| env(key).and_then(|v| v.trim().parse::<f64>().ok());

        // Wake gate (env > toml > default)
        let wake = WakeConfig {
            words: env("RELAY_WAKE_WORDS")
                .map(|v| split_list(&v))
                .or(fc.wake.words)
                .unwrap_or_else(|| vec!["sudo".to_string(), "suto".to_string()]),
            threshold: env("RELAY_WAKE_THRESHOLD")
                .and_then(|v| v.trim().parse().ok())
                .or(fc.wake.threshold)
                .unwrap_or(0.5),
            frame_samples: fc.wake.frame_samples.unwrap_or(1280),
            warmup_frames: fc.wake.warmup_frames.unwrap_or(20),
            prefilter: fc.wake.prefilter.unwrap_or(false),
        };

        let recording = RecordingSettings {
            max_duration: parsed("RELAY_MAX_COMMAND_SECS")
                .or(fc.recording.max_secs)
                .map_or(Duration::from_secs(10), secs),
            silence_duration: parsed("RELAY_SILENCE_SECS")
                .or(fc.recording.silence_secs)
                .map_or(Duration::from_millis(1500), secs),
            frame_duration: Duration::from_millis(fc.recording.frame_ms.unwrap_or(30)),
            max_read_retries: fc.recording.max_read_retries.unwrap_or(3),
        };

        let vad = VadConfig {
            kind: fc
                .recording
                .vad
                .unwrap_or_else(|| default_vad().to_string()),
            aggressiveness: fc.recording.vad_aggressiveness.unwrap_or(3),
            energy_threshold: fc
                .recording
                .energy_threshold
                .unwrap_or(DEFAULT_ENERGY_THRESHOLD),
        };

        let conversation_timeout = env("RELAY_CONVERSATION_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .or(fc.conversation.timeout_secs)
            .map_or(DEFAULT_CONVERSATION_TIMEOUT, Duration::from_secs);

        let audio = AudioConfig {
            input_device: env("RELAY_INPUT_DEVICE").or(fc.audio.input_device),
            output_device: env("RELAY_OUTPUT_DEVICE").or(fc.audio.output_device),
            notification_sound: env("RELAY_NOTIFICATION_SOUND")
                .map(PathBuf::from)
                .or(fc.audio.notification_sound),
            settle_delay: fc
                .audio
                .settle_secs
                .map_or(Duration::from_millis(1500), secs),
            playback_grace: fc
                .audio
                .playback_grace_secs
                .map_or(Duration::from_secs(3), secs),
        };

        let stt_provider = env("RELAY_STT_PROVIDER")
            .or(fc.stt.provider)
            .unwrap_or_else(|| "whisper".to_string());
        let stt = SttConfig {
            model: fc
                .stt
                .model
                .unwrap_or_else(|| default_stt_model(&stt_provider).to_string()),
            provider: stt_provider,
            language: fc.stt.language.or_else(|| Some("en".to_string())),
            command: fc.stt.command.unwrap_or_default(),
        };

        let tts_provider = env("RELAY_TTS_PROVIDER")
            .or(fc.tts.provider)
            .unwrap_or_else(|| "openai".to_string());
        let tts = TtsConfig {
            model: fc
                .tts
                .model
                .unwrap_or_else(|| default_tts_model(&tts_provider).to_string()),
            provider: tts_provider,
            voice: fc.tts.voice.unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            piper_program: fc.tts.piper_program.unwrap_or_else(|| "piper".to_string()),
            piper_model: fc.tts.piper_model,
        };

        // Reasoner command line (env > toml > default)
        let (program, args) = env("RELAY_REASONER")
            .map(|v| split_command(&v))
            .or_else(|| fc.reasoner.command.map(split_vec))
            .unwrap_or_else(CommandReasoner::default_command);
        let reasoner = ReasonerConfig {
            program,
            args,
            timeout: fc
                .reasoner
                .timeout_secs
                .map_or(DEFAULT_QUERY_TIMEOUT, Duration::from_secs),
        };

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
        };

        Self {
            wake,
            recording,
            vad,
            conversation_timeout,
            audio,
            stt,
            tts,
            reasoner,
            api_keys,
        }
    }

    /// Check the resolved values for consistency
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.wake.words.iter().all(|w| w.trim().is_empty()) {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return Err(Error::Config(format!(
                "wake threshold {} is outside [0, 1]",
                self.wake.threshold
            )));
        }
        if self.wake.frame_samples == 0 {
            return Err(Error::Config("wake frame size must be positive".to_string()));
        }

        let recording = &self.recording;
        if recording.max_duration.is_zero() || recording.silence_duration.is_zero() {
            return Err(Error::Config(
                "recording durations must be positive".to_string(),
            ));
        }
        recording.frame_samples()?;
        if recording.frame_duration > recording.max_duration {
            return Err(Error::Config(format!(
                "frame duration {:?} exceeds max command duration {:?}",
                recording.frame_duration, recording.max_duration
            )));
        }

        if self.conversation_timeout.is_zero() {
            return Err(Error::Config(
                "conversation timeout must be positive".to_string(),
            ));
        }

        check_known("vad", &self.vad.kind, VAD_KINDS)?;
        if self.vad.kind == "webrtc" && !cfg!(feature = "webrtc-vad") {
            return Err(Error::Config(
                "vad \"webrtc\" needs the webrtc-vad feature".to_string(),
            ));
        }
        if self.vad.aggressiveness > 3 {
            return Err(Error::Config("vad aggressiveness must be 0 to 3".to_string()));
        }
        if self.vad.kind == "webrtc" && ![10, 20, 30].contains(&recording.frame_duration.as_millis())
        {
            return Err(Error::Config(
                "webrtc vad needs 10, 20 or 30 ms frames".to_string(),
            ));
        }

        check_known("stt provider", &self.stt.provider, STT_PROVIDERS)?;
        if self.stt.provider == "command" && self.stt.command.is_empty() {
            return Err(Error::Config("stt.command is required for the command provider".to_string()));
        }

        check_known("tts provider", &self.tts.provider, TTS_PROVIDERS)?;
        if self.tts.provider == "piper" && self.tts.piper_model.is_none() {
            return Err(Error::Config("tts.piper_model is required for piper".to_string()));
        }

        if self.reasoner.program.trim().is_empty() {
            return Err(Error::Config("reasoner command is empty".to_string()));
        }
        if self.reasoner.timeout.is_zero() {
            return Err(Error::Config("reasoner timeout must be positive".to_string()));
        }

        Ok(())
    }
}

fn check_known(what: &str, value: &str, known: &[&str]) -> Result<()> {
    if known.contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "unknown {what} {value:?} (expected one of {})",
            known.join(", ")
        )))
    }
}

const fn default_vad() -> &'static str {
    if cfg!(feature = "webrtc-vad") {
        "webrtc"
    } else {
        "energy"
    }
}

/// Seconds as a duration; negative or non-finite values become zero so
/// `validate` rejects them
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Split a comma-separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Split a whitespace-separated command line into program and arguments
fn split_command(value: &str) -> (String, Vec<String>) {
    split_vec(value.split_whitespace().map(ToString::to_string).collect())
}

fn split_vec(mut parts: Vec<String>) -> (String, Vec<String>) {
    if parts.is_empty() {
        return (String::new(), Vec::new());
    }
    let program = parts.remove(0);
    (program, parts)
}

/// Model used when the config names none, per STT provider
fn default_stt_model(provider: &str) -> &'static str {
    match provider {
        "deepgram" => "nova-2",
        _ => "whisper-1",
    }
}

/// Model used when the config names none, per TTS provider
fn default_tts_model(provider: &str) -> &'static str {
    match provider {
        "elevenlabs" => "eleven_monolingual_v1",
        _ => "tts-1",
    }
}
