//! Daemon - the voice relay service
//!
//! Builds the concrete devices and backends named by [`Config`] and hands
//! them to a [`TurnController`].

use std::sync::Arc;

use crate::reasoner::{CommandReasoner, Reasoner};
use crate::session::SessionSummary;
use crate::turn::{TurnController, TurnParts, TurnSettings};
use crate::voice::{
    AudioCapture, AudioPlayback, EndpointRecorder, EnergyVad, GateSettings, PlaybackGuard,
    SpeechToText, Synthesizer, TextToSpeech, Transcriber, TranscriptSpotter, VoiceActivity,
    WakeGate, Waveform,
};
use crate::{Config, Error, Result};

/// The relay daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Wake words this daemon listens for
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.config.wake.words
    }

    /// Open devices and construct the turn controller
    ///
    /// # Errors
    ///
    /// Returns error if a device cannot be opened or a backend is misconfigured
    pub fn build_controller(&self) -> Result<TurnController> {
        let config = &self.config;

        let transcriber = build_transcriber(config)?;
        let synthesizer = build_synthesizer(config)?;
        let reasoner = build_reasoner(config)?;

        let source = AudioCapture::new(config.audio.input_device.as_deref())?;
        tracing::info!(device = %source.device_name(), "microphone ready");
        let sink = AudioPlayback::new(config.audio.output_device.as_deref())?;

        let spotter = TranscriptSpotter::new(&config.wake.words, Arc::clone(&transcriber))?;
        let mut gate = WakeGate::new(
            Box::new(spotter),
            GateSettings {
                labels: config.wake.words.clone(),
                frame_samples: config.wake.frame_samples,
                warmup_frames: config.wake.warmup_frames,
            },
        );
        if config.wake.prefilter {
            gate = gate.with_prefilter(Box::new(EnergyVad::new(config.vad.energy_threshold)));
        }

        let guard = PlaybackGuard::new(
            Box::new(sink),
            synthesizer,
            config.audio.settle_delay,
            config.audio.playback_grace,
        );

        let parts = TurnParts {
            source: Box::new(source),
            gate,
            recorder: EndpointRecorder::new(build_vad(config)?),
            transcriber,
            reasoner,
            guard,
            notification: load_notification(config),
        };

        let settings = TurnSettings {
            threshold: config.wake.threshold,
            recording: config.recording.clone(),
            conversation_timeout: config.conversation_timeout,
        };

        Ok(TurnController::new(parts, settings))
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the daemon cannot start or the microphone fails
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<Option<SessionSummary>> {
        let mut controller = self.build_controller()?;

        tracing::info!(
            words = ?self.config.wake.words,
            threshold = self.config.wake.threshold,
            "voice relay running"
        );

        controller.run_until(interrupted()).await
    }
}

/// Resolves on Ctrl-C
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Construct the configured speech-to-text backend
///
/// # Errors
///
/// Returns error if the provider is unknown or lacks credentials
pub fn build_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>> {
    let stt = &config.stt;
    let backend = match stt.provider.as_str() {
        "whisper" => SpeechToText::new_whisper(
            config.api_keys.openai.clone().unwrap_or_default(),
            stt.model.clone(),
            stt.language.clone(),
        )?,
        "deepgram" => SpeechToText::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            stt.model.clone(),
        )?,
        "command" => {
            let (program, args) = stt
                .command
                .split_first()
                .ok_or_else(|| Error::Config("stt.command is empty".to_string()))?;
            SpeechToText::new_command(program.clone(), args.to_vec())?
        }
        other => return Err(Error::Config(format!("unknown stt provider {other:?}"))),
    };
    tracing::debug!(provider = backend.name(), "transcriber ready");
    Ok(Arc::new(backend))
}

/// Construct the configured text-to-speech backend
///
/// # Errors
///
/// Returns error if the provider is unknown or lacks credentials
pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn Synthesizer>> {
    let tts = &config.tts;
    let backend = match tts.provider.as_str() {
        "openai" => TextToSpeech::new_openai(
            config.api_keys.openai.clone().unwrap_or_default(),
            tts.voice.clone(),
            tts.speed,
            tts.model.clone(),
        )?,
        "elevenlabs" => TextToSpeech::new_elevenlabs(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            tts.voice.clone(),
            tts.model.clone(),
        )?,
        "piper" => {
            let model = tts
                .piper_model
                .clone()
                .ok_or_else(|| Error::Config("tts.piper_model is required".to_string()))?;
            TextToSpeech::new_piper(tts.piper_program.clone(), model)?
        }
        other => return Err(Error::Config(format!("unknown tts provider {other:?}"))),
    };
    tracing::debug!(provider = backend.name(), "synthesizer ready");
    Ok(Arc::new(backend))
}

/// Construct the reasoning command
///
/// # Errors
///
/// Returns error if the program is not on `PATH`
pub fn build_reasoner(config: &Config) -> Result<Arc<dyn Reasoner>> {
    let reasoner = CommandReasoner::new(
        config.reasoner.program.clone(),
        config.reasoner.args.clone(),
        config.reasoner.timeout,
    )?;
    Ok(Arc::new(reasoner))
}

/// Construct the command-endpointing classifier
///
/// # Errors
///
/// Returns error if the classifier is unknown or not compiled in
pub fn build_vad(config: &Config) -> Result<Box<dyn VoiceActivity>> {
    match config.vad.kind.as_str() {
        "energy" => Ok(Box::new(EnergyVad::new(config.vad.energy_threshold))),
        #[cfg(feature = "webrtc-vad")]
        "webrtc" => Ok(Box::new(crate::voice::WebRtcVad::new(config.vad.aggressiveness))),
        other => Err(Error::Config(format!("voice activity classifier {other:?} unavailable"))),
    }
}

/// The wake acknowledgment: the configured WAV, or a chime
#[must_use]
pub fn load_notification(config: &Config) -> Waveform {
    let Some(path) = config.audio.notification_sound.as_deref() else {
        return Waveform::chime();
    };

    match Waveform::from_wav_file(path) {
        Ok(waveform) => {
            tracing::debug!(path = %path.display(), "notification sound loaded");
            waveform
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "notification sound unusable, using chime");
            Waveform::chime()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::parse_config;

    fn config(toml: &str) -> Config {
        Config::from_sources(parse_config(toml).unwrap(), |_| None)
    }

    #[test]
    fn test_missing_notification_falls_back_to_chime() {
        let config = config("[audio]\nnotification_sound = \"/nonexistent/ding.wav\"\n");
        assert_eq!(load_notification(&config), Waveform::chime());
    }

    #[test]
    fn test_notification_file_loaded() {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let wav = crate::voice::samples_to_wav(&[0, 1000, -1000, 0], 16000).unwrap();
        std::fs::write(file.path(), wav).unwrap();

        let mut config = Config::default();
        config.audio.notification_sound = Some(file.path().to_path_buf());
        let waveform = load_notification(&config);
        assert_eq!(waveform.sample_rate, 16000);
        assert_eq!(waveform.samples.len(), 4);
    }

    #[test]
    fn test_whisper_needs_key() {
        let config = config("[stt]\nprovider = \"whisper\"\n");
        assert!(matches!(build_transcriber(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_command_transcriber_built() {
        let config = config("[stt]\nprovider = \"command\"\ncommand = [\"cat\", \"{audio}\"]\n");
        assert_eq!(build_transcriber(&config).unwrap().name(), "command");
    }

    #[test]
    fn test_energy_vad_built() {
        let config = config("[recording]\nvad = \"energy\"\n");
        assert_eq!(build_vad(&config).unwrap().name(), "energy");
    }
}
