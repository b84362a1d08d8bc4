//! Speech-to-text (STT) processing

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Result};

/// Upper bound for one transcription, by API request or local command
const TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(120);

const OPENAI_API: &str = "https://api.openai.com/v1";
const DEEPGRAM_API: &str = "https://api.deepgram.com/v1";

/// Placeholder replaced with the WAV file path in command arguments
pub const AUDIO_PLACEHOLDER: &str = "{audio}";

/// Turns a bounded audio buffer into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes (mono, 16 kHz, 16-bit)
    ///
    /// Returns an empty string when no speech was recognized.
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Debug)]
enum SttProvider {
    Whisper { language: Option<String> },
    Deepgram,
    Command { program: String, args: Vec<String> },
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String, language: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(TRANSCRIPTION_TIMEOUT)?,
            base_url: OPENAI_API.to_string(),
            api_key,
            model,
            provider: SttProvider::Whisper { language },
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: http_client(TRANSCRIPTION_TIMEOUT)?,
            base_url: DEEPGRAM_API.to_string(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Create a new STT instance running a local command (e.g. whisper.cpp)
    ///
    /// The audio is written to a temporary WAV file whose path replaces
    /// `{audio}` in `args`; the command's stdout is the transcript.
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be found
    pub fn new_command(program: String, args: Vec<String>) -> Result<Self> {
        which::which(&program)
            .map_err(|e| Error::Config(format!("STT command {program} not found: {e}")))?;

        Ok(Self {
            client: http_client(TRANSCRIPTION_TIMEOUT)?,
            base_url: String::new(),
            api_key: String::new(),
            model: program.clone(),
            provider: SttProvider::Command { program, args },
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

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8], language: Option<&str>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                request_failed("Whisper", &e)
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Transcription(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            request_failed("Whisper", &e)
        })?;

        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "{}/listen?model={}&punctuate=true",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                request_failed("Deepgram", &e)
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Transcription(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            request_failed("Deepgram", &e)
        })?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }

    /// Transcribe by running a local command on a temporary WAV file
    async fn transcribe_command(audio: &[u8], program: &str, args: &[String]) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("relay-command-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(audio)?;
        file.flush()?;

        let path = file.path().display().to_string();
        let args: Vec<String> = args
            .iter()
            .map(|a| a.replace(AUDIO_PLACEHOLDER, &path))
            .collect();

        tracing::debug!(program, ?args, "starting local transcription");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transcription(format!("failed to spawn {program}: {e}")))?;

        let output = tokio::time::timeout(TRANSCRIPTION_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Transcription(format!("{program} timed out")))?
            .map_err(|e| Error::Transcription(format!("{program} failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transcription(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// A failed or timed-out API call is a transcription failure
fn request_failed(backend: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transcription(format!("{backend} request timed out"))
    } else {
        Error::Transcription(format!("{backend} request failed: {e}"))
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let raw = match &self.provider {
            SttProvider::Whisper { language } => {
                self.transcribe_whisper(wav, language.as_deref()).await?
            }
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await?,
            SttProvider::Command { program, args } => {
                Self::transcribe_command(wav, program, args).await?
            }
        };

        let transcript = raw.trim().to_string();
        tracing::info!(transcript = %transcript, backend = self.name(), "transcription complete");
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        match self.provider {
            SttProvider::Whisper { .. } => "whisper",
            SttProvider::Deepgram => "deepgram",
            SttProvider::Command { .. } => "command",
        }
    }
}
