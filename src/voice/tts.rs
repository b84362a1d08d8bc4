//! Text-to-speech (TTS) processing

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::frame::Waveform;
use crate::{Error, Result};

/// Upper bound for one synthesis, by API request or local command
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

const OPENAI_API: &str = "https://api.openai.com/v1";
const ELEVENLABS_API: &str = "https://api.elevenlabs.io/v1";

/// Renders text to a playable waveform
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text to speech
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Waveform>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// TTS provider backend
#[derive(Clone, Debug)]
enum TtsProvider {
    OpenAI,
    ElevenLabs,
    Piper { program: String, model: PathBuf },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI` with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http_client(SYNTHESIS_TIMEOUT)?,
            base_url: OPENAI_API.to_string(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(SYNTHESIS_TIMEOUT)?,
            base_url: ELEVENLABS_API.to_string(),
            api_key,
            voice: voice_id,
            speed: 1.0, // ElevenLabs doesn't use speed in the same way
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Create a new TTS instance running Piper locally
    ///
    /// # Errors
    ///
    /// Returns error if the program or voice model cannot be found
    pub fn new_piper(program: String, model: PathBuf) -> Result<Self> {
        which::which(&program)
            .map_err(|e| Error::Config(format!("piper command {program} not found: {e}")))?;
        if !model.exists() {
            return Err(Error::Config(format!(
                "piper voice model not found: {}",
                model.display()
            )));
        }

        Ok(Self {
            client: http_client(SYNTHESIS_TIMEOUT)?,
            base_url: String::new(),
            api_key: String::new(),
            voice: model.display().to_string(),
            speed: 1.0,
            model: program.clone(),
            provider: TtsProvider::Piper { program, model },
        })
    }

    /// Send API requests to `base_url` instead of the provider's endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_failed("OpenAI TTS", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| request_failed("OpenAI TTS", &e))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "{}/text-to-speech/{}",
            self.base_url, self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| request_failed("ElevenLabs TTS", &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| request_failed("ElevenLabs TTS", &e))?;
        Ok(audio.to_vec())
    }

    /// Synthesize with Piper: text on stdin, WAV written to a temporary file
    async fn synthesize_piper(text: &str, program: &str, model: &Path) -> Result<Waveform> {
        let output_file = tempfile::Builder::new()
            .prefix("relay-speech-")
            .suffix(".wav")
            .tempfile()?;

        let mut child = Command::new(program)
            .arg("--model")
            .arg(model)
            .arg("--output_file")
            .arg(output_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to spawn {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| Error::Synthesis(format!("failed to write to piper stdin: {e}")))?;
        }

        let output = tokio::time::timeout(SYNTHESIS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Synthesis(format!("{program} timed out")))?
            .map_err(|e| Error::Synthesis(format!("{program} failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Waveform::from_wav_file(output_file.path())
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// A failed or timed-out API call is a synthesis failure
fn request_failed(backend: &str, e: &reqwest::Error) -> Error {
    tracing::error!(error = %e, backend, "TTS request failed");
    if e.is_timeout() {
        Error::Synthesis(format!("{backend} request timed out"))
    } else {
        Error::Synthesis(format!("{backend} request failed: {e}"))
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Waveform> {
        tracing::debug!(chars = text.len(), backend = self.name(), "synthesizing speech");
        match &self.provider {
            TtsProvider::OpenAI => Waveform::from_mp3(&self.synthesize_openai(text).await?),
            TtsProvider::ElevenLabs => {
                Waveform::from_mp3(&self.synthesize_elevenlabs(text).await?)
            }
            TtsProvider::Piper { program, model } => {
                Self::synthesize_piper(text, program, model).await
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.provider {
            TtsProvider::OpenAI => "openai",
            TtsProvider::ElevenLabs => "elevenlabs",
            TtsProvider::Piper { .. } => "piper",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_keys_rejected() {
        assert!(
            TextToSpeech::new_openai(String::new(), "alloy".into(), 1.0, "tts-1".into()).is_err()
        );
        assert!(
            TextToSpeech::new_elevenlabs(String::new(), "voice".into(), "model".into()).is_err()
        );
    }

    #[tokio::test]
    async fn test_hung_api_request_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let tts = TextToSpeech::new_openai("key".into(), "alloy".into(), 1.0, "tts-1".into())
            .unwrap()
            .with_base_url(format!("http://{addr}"))
            .with_request_timeout(Duration::from_millis(200))
            .unwrap();

        let err = tts.synthesize("hello").await.unwrap_err();
        assert!(matches!(err, Error::Synthesis(ref msg) if msg == "OpenAI TTS request timed out"));
    }

    #[test]
    fn test_piper_requires_model_file() {
        let err = TextToSpeech::new_piper("sh".to_string(), PathBuf::from("/nonexistent/voice.onnx"));
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
