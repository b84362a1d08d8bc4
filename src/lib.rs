//! Voice Relay - wake-word driven voice front end for a reasoning service
//!
//! This library provides the turn-taking core of the relay:
//! - Wake-word gating with reset and warm-up flushing between activations
//! - Command capture ended by sustained silence or a duration cap
//! - Conversation sessions that lapse after inactivity
//! - Playback with a settle delay so the relay never hears itself
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Audio devices                       │
//! │        Microphone (cpal)   │   Speaker (cpal)        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Controller                      │
//! │  Wake Gate │ Recorder │ Sessions │ Playback Guard    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Collaborators                       │
//! │    STT   │   Reasoner (command)   │   TTS            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod reasoner;
pub mod session;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use reasoner::{CommandReasoner, QueryOutcome, Reasoner};
pub use session::{ConversationSession, SessionSummary, SessionTracker};
pub use turn::{Turn, TurnController, TurnOutcome, TurnParts, TurnSettings, TurnState};
