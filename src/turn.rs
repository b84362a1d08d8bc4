//! Turn-taking state machine
//!
//! One [`TurnController`] owns every component and runs turns strictly one
//! at a time:
//!
//! ```text
//! LISTENING → NOTIFY → RECORDING → TRANSCRIBING → QUERYING → SPEAKING → SETTLING
//!     ▲                    │             │ (empty)                          │
//!     └────────────────────┴─────────────┴──────────────────────────────────┘
//! ```
//!
//! Only a device failure while listening ends the loop. Collaborator failures
//! become a spoken apology, and recording failures drop the turn.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::reasoner::Reasoner;
use crate::session::{SessionSummary, SessionTracker};
use crate::voice::{
    Detection, EndpointRecorder, FrameSource, PlaybackGuard, Recording, RecordingSettings,
    Transcriber, WakeGate, Waveform,
};
use crate::{Error, Result};

/// Spoken when the reasoner does not answer in time
pub const TIMEOUT_APOLOGY: &str = "I apologize, but the request took too long to process.";

/// Where the controller is in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Scoring frames for a wake word
    Listening,
    /// Playing the acknowledgment sound
    Notify,
    /// Capturing the command
    Recording,
    /// Waiting on speech-to-text
    Transcribing,
    /// Waiting on the reasoner
    Querying,
    /// Playing the reply
    Speaking,
    /// Holding the microphone off after playback
    Settling,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was spoken
    Replied,
    /// A collaborator failed and an apology was spoken
    Apologized,
    /// Nothing was said after the wake word
    NoCommand,
    /// Recording failed; nothing was spoken
    Aborted,
}

/// Record of one wake-to-speak cycle
#[derive(Debug, Clone)]
pub struct Turn {
    /// Wake label that started the turn
    pub label: String,
    /// Its confidence
    pub confidence: f32,
    /// Transcribed command, if transcription succeeded
    pub transcript: Option<String>,
    /// Text spoken back, reply or apology
    pub reply: Option<String>,
    /// Conversation the turn belonged to
    pub session_id: Option<String>,
    /// How the turn ended
    pub outcome: TurnOutcome,
}

impl Turn {
    fn detected(detection: Detection) -> Self {
        Self {
            label: detection.label,
            confidence: detection.confidence,
            transcript: None,
            reply: None,
            session_id: None,
            outcome: TurnOutcome::Aborted,
        }
    }
}

/// Tunables for the controller
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// Wake confidence needed to start a turn
    pub threshold: f32,
    /// Command capture limits
    pub recording: RecordingSettings,
    /// Inactivity after which a new conversation starts
    pub conversation_timeout: Duration,
}

/// Components a controller is assembled from
pub struct TurnParts {
    /// Microphone
    pub source: Box<dyn FrameSource>,
    /// Wake-word gate
    pub gate: WakeGate,
    /// Command recorder
    pub recorder: EndpointRecorder,
    /// Speech-to-text
    pub transcriber: Arc<dyn Transcriber>,
    /// Reasoning service
    pub reasoner: Arc<dyn Reasoner>,
    /// Speaker with settle enforcement
    pub guard: PlaybackGuard,
    /// Acknowledgment sound played on wake
    pub notification: Waveform,
}

/// Drives the listen, record, answer cycle
pub struct TurnController {
    source: Box<dyn FrameSource>,
    gate: WakeGate,
    recorder: EndpointRecorder,
    transcriber: Arc<dyn Transcriber>,
    reasoner: Arc<dyn Reasoner>,
    guard: PlaybackGuard,
    notification: Waveform,
    sessions: SessionTracker,
    settings: TurnSettings,
    state: TurnState,
}

impl TurnController {
    /// Assemble a controller
    #[must_use]
    pub fn new(parts: TurnParts, settings: TurnSettings) -> Self {
        Self {
            source: parts.source,
            gate: parts.gate,
            recorder: parts.recorder,
            transcriber: parts.transcriber,
            reasoner: parts.reasoner,
            guard: parts.guard,
            notification: parts.notification,
            sessions: SessionTracker::new(settings.conversation_timeout),
            settings,
            state: TurnState::Listening,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Session tracker
    #[must_use]
    pub const fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    fn enter(&mut self, state: TurnState) {
        tracing::debug!(from = ?self.state, to = ?state, "turn state");
        self.state = state;
    }

    /// Run one full turn, returning once the controller is back to listening
    ///
    /// # Errors
    ///
    /// Returns error only if the microphone fails while listening for the
    /// wake word
    pub async fn run_turn(&mut self) -> Result<Turn> {
        // the microphone stays closed until the last playback has settled
        self.guard.settle().await;
        self.enter(TurnState::Listening);

        let detection = self
            .gate
            .listen_until_detected(self.source.as_mut(), self.settings.threshold)
            .await?;
        let mut turn = Turn::detected(detection);

        self.enter(TurnState::Notify);
        self.guard.play(&self.notification).await;
        self.guard.settle().await;

        self.enter(TurnState::Recording);
        let recording = match self
            .recorder
            .record(self.source.as_mut(), &self.settings.recording)
            .await
        {
            Ok(recording) => recording,
            Err(e) => {
                tracing::error!(error = %e, "recording failed, dropping turn");
                self.enter(TurnState::Listening);
                return Ok(turn);
            }
        };
        tracing::debug!(duration = ?recording.duration(), reason = ?recording.stop_reason, "command captured");

        self.enter(TurnState::Transcribing);
        let transcript = match self.transcribe(&recording).await {
            Ok(transcript) => transcript,
            Err(e) => {
                // the user still engaged, so the conversation stays alive
                turn.session_id = Some(self.renew_session());
                return Ok(self.apologize(turn, &e).await);
            }
        };

        if transcript.is_empty() {
            tracing::info!("no command heard, back to listening");
            turn.outcome = TurnOutcome::NoCommand;
            self.enter(TurnState::Listening);
            return Ok(turn);
        }
        turn.transcript = Some(transcript.clone());

        self.enter(TurnState::Querying);
        let session_id = self.renew_session();
        turn.session_id = Some(session_id.clone());

        let outcome = self.reasoner.query(&transcript, &session_id).await;
        let reply = match outcome.into_reply() {
            Ok(reply) => reply,
            Err(e) => return Ok(self.apologize(turn, &e).await),
        };

        self.enter(TurnState::Speaking);
        turn.reply = Some(reply.clone());
        match self.guard.synthesize_and_play(&reply).await {
            Ok(_) => turn.outcome = TurnOutcome::Replied,
            Err(e) => return Ok(self.apologize(turn, &e).await),
        }

        self.finish_turn().await;
        Ok(turn)
    }

    async fn transcribe(&self, recording: &Recording) -> Result<String> {
        let wav = recording
            .to_wav()
            .map_err(|e| Error::Transcription(format!("could not encode command: {e}")))?;
        let transcript = self.transcriber.transcribe(&wav).await?;
        Ok(transcript.trim().to_string())
    }

    fn renew_session(&mut self) -> String {
        self.sessions.current_session(Instant::now()).id.clone()
    }

    /// Speak an apology for `error` and close the turn
    ///
    /// A synthesis failure here is only logged, there is nothing left to say
    /// it with.
    async fn apologize(&mut self, mut turn: Turn, error: &Error) -> Turn {
        tracing::warn!(error = %error, state = ?self.state, "turn failed");
        let message = apology_for(error);

        self.enter(TurnState::Speaking);
        if let Err(e) = self.guard.synthesize_and_play(&message).await {
            tracing::error!(error = %e, "could not speak apology");
        }

        turn.reply = Some(message);
        turn.outcome = TurnOutcome::Apologized;
        self.finish_turn().await;
        turn
    }

    async fn finish_turn(&mut self) {
        self.enter(TurnState::Settling);
        self.guard.settle().await;
        self.enter(TurnState::Listening);
    }

    /// Run turns until `shutdown` resolves or the microphone fails
    ///
    /// The source is closed and the session summary logged either way.
    ///
    /// # Errors
    ///
    /// Returns the device error that ended the loop
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<Option<SessionSummary>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break Ok(());
                }
                turn = self.run_turn() => match turn {
                    Ok(turn) => {
                        tracing::info!(label = %turn.label, outcome = ?turn.outcome, "turn complete");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "audio device failed, stopping");
                        break Err(e);
                    }
                },
            }
        };

        let summary = self.shutdown();
        result.map(|()| summary)
    }

    /// Release the microphone and report the current session
    pub fn shutdown(&mut self) -> Option<SessionSummary> {
        self.source.close();
        self.enter(TurnState::Listening);

        let summary = self.sessions.summary(Instant::now());
        match &summary {
            Some(summary) => tracing::info!(session = %summary.id, duration = ?summary.duration, "{summary}"),
            None => tracing::info!("no conversation this run"),
        }
        summary
    }
}

/// Spoken message for a failed turn
#[must_use]
pub fn apology_for(error: &Error) -> String {
    match error {
        Error::QueryTimeout(_) => TIMEOUT_APOLOGY.to_string(),
        Error::Query(detail) | Error::Transcription(detail) | Error::Synthesis(detail) => {
            format!("I encountered an error: {detail}")
        }
        other => format!("I encountered an error: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apology_messages() {
        assert_eq!(
            apology_for(&Error::QueryTimeout(Duration::from_secs(60))),
            TIMEOUT_APOLOGY
        );
        assert_eq!(
            apology_for(&Error::Query("rate limited".to_string())),
            "I encountered an error: rate limited"
        );
        assert_eq!(
            apology_for(&Error::Transcription("offline".to_string())),
            "I encountered an error: offline"
        );
    }
}
