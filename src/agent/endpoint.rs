use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::agent::error::AgentError;
use crate::agent::events::CompletePayload;
use crate::battle::{BattleSession, SessionId};

/// One of the two competitors in a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentKind {
    /// Accumulates the full conversation history across attempts
    #[serde(rename = "traditional")]
    Traditional,
    /// Ralph Loop: fresh context each attempt, state carried in a summary file
    #[serde(rename = "ralph", alias = "fresh")]
    Fresh,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Traditional, AgentKind::Fresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Traditional => "traditional",
            AgentKind::Fresh => "ralph",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "traditional" => Some(AgentKind::Traditional),
            "ralph" | "fresh" => Some(AgentKind::Fresh),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentKind::Traditional => "Traditional",
            AgentKind::Fresh => "Ralph Loop",
        }
    }

    /// Slot index for agent-keyed storage
    pub fn index(&self) -> usize {
        match self {
            AgentKind::Traditional => 0,
            AgentKind::Fresh => 1,
        }
    }

    pub fn opponent(&self) -> Self {
        match self {
            AgentKind::Traditional => AgentKind::Fresh,
            AgentKind::Fresh => AgentKind::Traditional,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw incremental messages for one attempt, in arrival order.
///
/// An `Err` item is a transport failure; the channel yields nothing after it.
pub type RawEventChannel = BoxStream<'static, Result<String, AgentError>>;

/// The remote service that performs generation for one agent at a time.
#[async_trait]
pub trait GenerationEndpoint: Send + Sync {
    /// Open an incremental event channel for one iteration attempt
    async fn open_stream(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<RawEventChannel, AgentError>;

    /// Run one iteration attempt synchronously (fallback path)
    async fn iterate(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<CompletePayload, AgentError>;

    /// Create a new battle session for a task
    async fn create_session(&self, task_id: &str) -> Result<BattleSession, AgentError>;

    /// Mark a session as started on the remote side
    async fn start_session(&self, session: SessionId) -> Result<(), AgentError>;

    /// Reset a session on the remote side
    async fn reset_session(&self, session: SessionId) -> Result<(), AgentError>;
}
