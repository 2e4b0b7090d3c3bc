use std::time::Duration;

use thiserror::Error;

use crate::agent::endpoint::AgentKind;
use crate::battle::SessionId;

/// Markers that identify a rate-limit condition inside a remote error message.
const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "rate_limit", "429"];

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Channel failed to open or closed before a terminal event.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed incremental message.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Explicit `error` event or non-2xx synchronous response.
    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Attempt already in flight for {agent} in session {session}")]
    AttemptInFlight { session: SessionId, agent: AgentKind },

    #[error("{0} has already completed")]
    AgentCompleted(AgentKind),

    #[error("No live session")]
    NoSession,
}

impl AgentError {
    /// Classify a remote error message, promoting rate-limit markers.
    pub fn from_remote_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            AgentError::RateLimited {
                message,
                retry_after: None,
            }
        } else {
            AgentError::Remote(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AgentError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the controller may recover by falling back to the synchronous call.
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_))
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}
