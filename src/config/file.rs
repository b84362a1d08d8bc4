//! TOML configuration file loading
//!
//! Supports `~/.config/voice-relay/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfigFile {
    /// Wake-word gate
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Command recording
    #[serde(default)]
    pub recording: RecordingFileConfig,

    /// Conversation sessions
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Audio devices and playback
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Speech-to-text backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Reasoning command
    #[serde(default)]
    pub reasoner: ReasonerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Wake-word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Wake phrases (e.g. `["sudo", "suto"]`)
    pub words: Option<Vec<String>>,

    /// Detection threshold in `[0, 1]`
    pub threshold: Option<f32>,

    /// Samples per scored frame
    pub frame_samples: Option<usize>,

    /// Frames discarded after the microphone opens
    pub warmup_frames: Option<usize>,

    /// Zero wake scores on frames the VAD calls non-speech
    pub prefilter: Option<bool>,
}

/// Recording configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecordingFileConfig {
    /// Silence that ends a command, in seconds
    pub silence_secs: Option<f64>,

    /// Longest command, in seconds
    pub max_secs: Option<f64>,

    /// VAD frame length in milliseconds (10, 20 or 30)
    pub frame_ms: Option<u64>,

    /// Consecutive read failures tolerated
    pub max_read_retries: Option<u32>,

    /// Classifier: "webrtc" or "energy"
    pub vad: Option<String>,

    /// WebRTC aggressiveness, 0 to 3
    pub vad_aggressiveness: Option<u8>,

    /// RMS threshold for the energy classifier
    pub energy_threshold: Option<f32>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Inactivity before a new conversation starts, in seconds
    pub timeout_secs: Option<u64>,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,

    /// WAV played on wake (a chime when unset)
    pub notification_sound: Option<PathBuf>,

    /// Pause after playback before the microphone reopens, in seconds
    pub settle_secs: Option<f64>,

    /// Extra time allowed past a waveform's length, in seconds
    pub playback_grace_secs: Option<f64>,
}

/// STT configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper", "deepgram" or "command"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,

    /// Program and arguments for the command provider, `{audio}` is the WAV path
    pub command: Option<Vec<String>>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai", "elevenlabs" or "piper"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub piper_program: Option<String>,
    pub piper_model: Option<PathBuf>,
}

/// Reasoner configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReasonerFileConfig {
    /// Program and arguments, with `{prompt}` and `{session}` placeholders
    pub command: Option<Vec<String>>,

    /// Upper bound per query, in seconds
    pub timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown keys
pub fn parse_config(content: &str) -> Result<RelayConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path is
/// tried and `RelayConfigFile::default()` is returned if it is missing or
/// can't be parsed.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<RelayConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config = parse_config(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(RelayConfigFile::default());
    };

    if !path.exists() {
        return Ok(RelayConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(RelayConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(RelayConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/voice-relay/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-relay").join("config.toml"))
}
