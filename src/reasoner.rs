//! Reasoning service adapter
//!
//! The reasoner receives a transcribed command plus the conversation id and
//! answers with reply text. Calls are bounded by a timeout and never retried.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Result};

/// Default upper bound for one query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder replaced with the command text
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Placeholder replaced with the conversation id
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// Environment variable carrying the conversation id to the child process
pub const SESSION_ENV: &str = "RELAY_SESSION_ID";

/// Reply given when the reasoner succeeds without printing anything
pub const EMPTY_REPLY: &str = "I processed your request but have no output to share.";

/// Result of one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Reply text to speak
    Reply(String),
    /// No answer within the bound
    TimedOut(Duration),
    /// The service failed, with its message
    Failed(String),
}

impl QueryOutcome {
    /// Convert into reply text, or the matching query error
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueryTimeout`] or [`Error::Query`] for unsuccessful outcomes
    pub fn into_reply(self) -> Result<String> {
        match self {
            Self::Reply(text) => Ok(text),
            Self::TimedOut(limit) => Err(Error::QueryTimeout(limit)),
            Self::Failed(message) => Err(Error::Query(message)),
        }
    }
}

/// Answers a transcribed command within a conversation
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Submit `prompt` under `session_id`
    async fn query(&self, prompt: &str, session_id: &str) -> QueryOutcome;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Runs an external command per query
///
/// `{prompt}` and `{session}` in the arguments are substituted; stdout is
/// the reply. The default is `claude --continue -p {prompt}`.
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReasoner {
    /// Create a reasoner for `program`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the program is not on `PATH`
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Result<Self> {
        which::which(&program)
            .map_err(|e| Error::Config(format!("reasoner command {program} not found: {e}")))?;

        tracing::debug!(program, ?args, timeout = ?timeout, "command reasoner initialized");

        Ok(Self {
            program,
            args,
            timeout,
        })
    }

    /// Default command line: `claude --continue -p {prompt}`
    #[must_use]
    pub fn default_command() -> (String, Vec<String>) {
        (
            "claude".to_string(),
            vec![
                "--continue".to_string(),
                "-p".to_string(),
                PROMPT_PLACEHOLDER.to_string(),
            ],
        )
    }

    fn render_args(&self, prompt: &str, session_id: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PROMPT_PLACEHOLDER, prompt)
                    .replace(SESSION_PLACEHOLDER, session_id)
            })
            .collect()
    }
}

#[async_trait]
impl Reasoner for CommandReasoner {
    async fn query(&self, prompt: &str, session_id: &str) -> QueryOutcome {
        let args = self.render_args(prompt, session_id);
        tracing::info!(program = %self.program, session = session_id, "querying reasoner");

        let child = match Command::new(&self.program)
            .args(&args)
            .env(SESSION_ENV, session_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %self.program, error = %e, "failed to spawn reasoner");
                return QueryOutcome::Failed(format!("failed to start {}: {e}", self.program));
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "reasoner failed");
                return QueryOutcome::Failed(e.to_string());
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "reasoner timed out");
                return QueryOutcome::TimedOut(self.timeout);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(status = %output.status, stderr = %stderr, "reasoner exited with error");
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return QueryOutcome::Failed(message);
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reply.is_empty() {
            return QueryOutcome::Reply(EMPTY_REPLY.to_string());
        }

        tracing::debug!(chars = reply.len(), "reasoner replied");
        QueryOutcome::Reply(reply)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
