use serde::{Deserialize, Serialize};

use crate::agent::endpoint::AgentKind;
use crate::battle::{AgentState, BattleStatus};

/// Typed incremental event for one iteration attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Attempt begins
    Start {
        #[serde(
            default,
            rename = "agent_type",
            skip_serializing_if = "Option::is_none"
        )]
        agent: Option<AgentKind>,
    },

    /// Incremental text fragment
    Chunk { content: String },

    /// Remote side retried internally; keep listening
    AttemptComplete(AttemptPayload),

    /// Terminal, success path
    Complete(CompletePayload),

    /// Terminal, failure path
    Error { message: String },
}

impl StreamEvent {
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::AttemptComplete(_) => "attempt_complete",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete(_) | StreamEvent::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptPayload {
    pub agent_state: AgentState,
    pub battle_status: BattleStatus,
}

/// Payload of a `complete` event, also the body of a synchronous iteration response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub agent_state: AgentState,
    pub battle_status: BattleStatus,
    #[serde(default)]
    pub winner: Option<AgentKind>,
}
