//! Playback with an enforced post-playback settle delay
//!
//! The speaker and microphone share a room. Every playback arms a settle
//! deadline, and nothing may reopen the microphone until [`PlaybackGuard::settle`]
//! has waited it out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::frame::Waveform;
use super::playback::AudioSink;
use super::tts::Synthesizer;
use crate::Result;

/// How a guarded playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The waveform played to the end
    Completed,
    /// The sink reported an error
    Failed,
    /// The sink did not finish within the waveform length plus grace
    TimedOut,
}

/// Plays audio and holds the microphone off until the room is quiet
pub struct PlaybackGuard {
    sink: Box<dyn AudioSink>,
    synthesizer: Arc<dyn Synthesizer>,
    settle_delay: Duration,
    grace: Duration,
    settle_until: Option<Instant>,
}

impl PlaybackGuard {
    /// Create a guard
    ///
    /// `grace` is added to each waveform's length to bound how long a stuck
    /// sink may block.
    #[must_use]
    pub fn new(
        sink: Box<dyn AudioSink>,
        synthesizer: Arc<dyn Synthesizer>,
        settle_delay: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            sink,
            synthesizer,
            settle_delay,
            grace,
            settle_until: None,
        }
    }

    /// Configured settle delay
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Deadline armed by the last playback, if not yet waited out
    #[must_use]
    pub const fn settle_deadline(&self) -> Option<Instant> {
        self.settle_until
    }

    /// Play a waveform, never raising
    ///
    /// Failures and timeouts are logged. The settle deadline is armed from the
    /// moment playback ends, whatever the outcome.
    pub async fn play(&mut self, waveform: &Waveform) -> PlaybackOutcome {
        let limit = waveform.duration() + self.grace;
        tracing::debug!(duration = ?waveform.duration(), "playback started");

        let outcome = match tokio::time::timeout(limit, self.sink.play(waveform)).await {
            Ok(Ok(())) => PlaybackOutcome::Completed,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "playback failed");
                PlaybackOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(limit = ?limit, "playback timed out");
                PlaybackOutcome::TimedOut
            }
        };

        self.settle_until = Some(Instant::now() + self.settle_delay);
        outcome
    }

    /// Render `text` with the synthesizer and play it
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails; playback problems are not errors
    pub async fn synthesize_and_play(&mut self, text: &str) -> Result<PlaybackOutcome> {
        let waveform = self.synthesizer.synthesize(text).await?;
        Ok(self.play(&waveform).await)
    }

    /// Wait until the settle deadline has passed
    ///
    /// Returns immediately when no playback is pending.
    pub async fn settle(&mut self) {
        if let Some(deadline) = self.settle_until.take() {
            tracing::debug!(remaining = ?deadline.saturating_duration_since(Instant::now()), "settling");
            tokio::time::sleep_until(deadline).await;
        }
    }
}
