//! Error types for the voice relay

use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio input/output device unavailable or failed mid-stream
    #[error("audio device error: {0}")]
    Device(String),

    /// Wake-word or voice-activity inference failed on a frame
    #[error("scoring error: {0}")]
    Scoring(String),

    /// Command capture gave up after repeated frame-read failures
    #[error("recording error: {0}")]
    Recording(String),

    /// Speech-to-text error
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Reasoning service returned an error
    #[error("query failed: {0}")]
    Query(String),

    /// Reasoning service did not answer in time
    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// Text-to-speech error
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// Notification or reply audio failed to play
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

