//! Conversation session tracking
//!
//! Consecutive turns share a session id so the reasoning service can keep
//! context. A session lapses after a period of inactivity and the next turn
//! starts a fresh one.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Default inactivity timeout (15 minutes)
pub const DEFAULT_CONVERSATION_TIMEOUT: Duration = Duration::from_secs(900);

/// One conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    /// Unique for the process lifetime
    pub id: String,
    /// When the session was created
    pub created_at: Instant,
    /// Last turn that touched the session
    pub last_interaction_at: Instant,
    /// Wall-clock creation time, for display
    pub started_at: DateTime<Utc>,
}

/// Issues and renews conversation sessions
#[derive(Debug)]
pub struct SessionTracker {
    timeout: Duration,
    current: Option<ConversationSession>,
    sequence: u64,
}

impl SessionTracker {
    /// Create a tracker with the given inactivity timeout
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            current: None,
            sequence: 0,
        }
    }

    /// Inactivity timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return the active session, renewing it, or start a new one
    ///
    /// A session idle for strictly longer than the timeout is replaced.
    pub fn current_session(&mut self, now: Instant) -> &ConversationSession {
        let expired = self.current.as_ref().is_some_and(|session| {
            now.saturating_duration_since(session.last_interaction_at) > self.timeout
        });
        if expired {
            self.current = None;
        }

        let sequence = &mut self.sequence;
        let session = self.current.get_or_insert_with(|| {
            *sequence += 1;
            let started_at = Utc::now();
            let id = format!("voice-{}-{sequence}", started_at.timestamp());
            tracing::info!(session = %id, "new conversation session");
            ConversationSession {
                id,
                created_at: now,
                last_interaction_at: now,
                started_at,
            }
        });

        session.last_interaction_at = now;
        tracing::debug!(session = %session.id, "conversation session renewed");
        session
    }

    /// The current session without renewing it
    #[must_use]
    pub const fn peek(&self) -> Option<&ConversationSession> {
        self.current.as_ref()
    }

    /// Time since `session` was created
    #[must_use]
    pub fn elapsed(session: &ConversationSession, now: Instant) -> Duration {
        now.saturating_duration_since(session.created_at)
    }

    /// Summary of the current session for shutdown reporting
    #[must_use]
    pub fn summary(&self, now: Instant) -> Option<SessionSummary> {
        self.current.as_ref().map(|session| SessionSummary {
            id: session.id.clone(),
            duration: Self::elapsed(session, now),
        })
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSATION_TIMEOUT)
    }
}

/// Identity and age of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id
    pub id: String,
    /// Time since the session started
    pub duration: Duration,
}

impl fmt::Display for SessionSummary {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = self.duration.as_secs_f64() / 60.0;
        write!(f, "final conversation {} ({minutes:.1} min)", self.id)
    }
}
