//! Battle session record - the identity-bearing state of one battle

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentKind;

/// Session identity; doubles as the fencing token for every update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Overall battle status. Ordered: a status never moves backward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

/// Per-agent status. Ordered: `Idle -> Running -> Completed`, never backward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

/// Outcome grade of an agent's latest attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Success,
    Failure,
    Partial,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::Failure => "failure",
            FinalStatus::Partial => "partial",
        }
    }
}

/// One recorded remote iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationRecord {
    pub iteration_number: u32,
    pub context_size: u64,
    pub tokens_used: u64,
    pub status: Option<FinalStatus>,
    pub code_snippet: String,
    pub message: String,
    pub timestamp: String,
}

/// Cumulative state of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(rename = "agent_type")]
    pub kind: AgentKind,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_time_ms: u64,
    #[serde(default)]
    pub final_status: Option<FinalStatus>,
    #[serde(default, alias = "current_context_size")]
    pub final_context_size: u64,
    #[serde(default)]
    pub final_code_snippet: String,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
}

impl AgentState {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            status: AgentStatus::Idle,
            total_tokens: 0,
            total_time_ms: 0,
            final_status: None,
            final_context_size: 0,
            final_code_snippet: String::new(),
            iterations: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_final_status(mut self, final_status: FinalStatus) -> Self {
        self.final_status = Some(final_status);
        self
    }

    pub fn with_tokens(mut self, total_tokens: u64) -> Self {
        self.total_tokens = total_tokens;
        self
    }

    pub fn with_time_ms(mut self, total_time_ms: u64) -> Self {
        self.total_time_ms = total_time_ms;
        self
    }

    pub fn with_code_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.final_code_snippet = snippet.into();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }

    /// Replace this snapshot with `incoming` (last-write-wins) without letting
    /// the status move backward.
    pub fn absorb(&mut self, incoming: AgentState) {
        let status = self.status.max(incoming.status);
        *self = incoming;
        self.status = status;
    }
}

/// One battle between the Traditional and Ralph Loop agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSession {
    pub id: SessionId,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub status: BattleStatus,
    #[serde(default)]
    pub winner: Option<AgentKind>,
    pub traditional_agent: AgentState,
    pub ralph_agent: AgentState,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl BattleSession {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            task_id: task_id.into(),
            status: BattleStatus::Idle,
            winner: None,
            traditional_agent: AgentState::new(AgentKind::Traditional),
            ralph_agent: AgentState::new(AgentKind::Fresh),
            created_at: Utc::now(),
        }
    }

    pub fn agent(&self, kind: AgentKind) -> &AgentState {
        match kind {
            AgentKind::Traditional => &self.traditional_agent,
            AgentKind::Fresh => &self.ralph_agent,
        }
    }

    pub fn agent_mut(&mut self, kind: AgentKind) -> &mut AgentState {
        match kind {
            AgentKind::Traditional => &mut self.traditional_agent,
            AgentKind::Fresh => &mut self.ralph_agent,
        }
    }

    /// Agents that still need another round
    pub fn pending_agents(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|kind| !self.agent(*kind).is_completed())
            .collect()
    }

    pub fn both_completed(&self) -> bool {
        self.pending_agents().is_empty()
    }

    /// Mark the battle and both agents as running
    pub fn mark_started(&mut self) {
        self.status = self.status.max(BattleStatus::Running);
        for kind in AgentKind::ALL {
            let agent = self.agent_mut(kind);
            agent.status = agent.status.max(AgentStatus::Running);
        }
    }

    /// Merge one agent's snapshot into the session.
    ///
    /// The snapshot replaces the agent's record; statuses never move backward and
    /// a winner, once declared, is kept.
    pub fn apply_snapshot(
        &mut self,
        kind: AgentKind,
        snapshot: AgentState,
        battle_status: BattleStatus,
        winner: Option<AgentKind>,
    ) {
        self.agent_mut(kind).absorb(snapshot);
        self.status = self.status.max(battle_status);
        if self.winner.is_none() {
            self.winner = winner;
        }
    }
}
