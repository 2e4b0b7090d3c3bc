//! Battle summary derived from a session

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::session::{AgentState, AgentStatus, BattleSession, BattleStatus, FinalStatus};
use crate::agent::AgentKind;

/// Aggregated battle results
#[derive(Debug, Clone, Serialize)]
pub struct BattleSummary {
    pub task_id: String,
    pub status: BattleStatus,
    pub winner: Option<AgentKind>,
    pub traditional: AgentSummary,
    pub ralph: AgentSummary,
}

/// Stats for one agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub final_status: Option<FinalStatus>,
    pub total_tokens: u64,
    pub total_time_ms: u64,
    pub iterations: usize,
    pub final_context_size: u64,
}

impl BattleSummary {
    pub fn from_session(session: &BattleSession) -> Self {
        Self {
            task_id: session.task_id.clone(),
            status: session.status,
            winner: session.winner,
            traditional: AgentSummary::from_state(&session.traditional_agent),
            ralph: AgentSummary::from_state(&session.ralph_agent),
        }
    }

    pub fn agent(&self, kind: AgentKind) -> &AgentSummary {
        match kind {
            AgentKind::Traditional => &self.traditional,
            AgentKind::Fresh => &self.ralph,
        }
    }

    pub fn winner_stats(&self) -> Option<&AgentSummary> {
        self.winner.map(|w| self.agent(w))
    }

    pub fn loser_stats(&self) -> Option<&AgentSummary> {
        self.winner.map(|w| self.agent(w.opponent()))
    }

    /// Token savings of the winner over the loser, as a percentage of the loser's usage
    pub fn token_savings(&self) -> Option<f64> {
        let (winner, loser) = (self.winner_stats()?, self.loser_stats()?);
        if loser.total_tokens == 0 {
            return None;
        }
        let saved = loser.total_tokens as f64 - winner.total_tokens as f64;
        Some(saved / loser.total_tokens as f64 * 100.0)
    }
}

impl AgentSummary {
    pub fn from_state(state: &AgentState) -> Self {
        Self {
            kind: state.kind,
            status: state.status,
            final_status: state.final_status,
            total_tokens: state.total_tokens,
            total_time_ms: state.total_time_ms,
            iterations: state.iterations.len(),
            final_context_size: state.final_context_size,
        }
    }

    /// Format time for display
    pub fn time_display(&self) -> String {
        let time = Duration::from_millis(self.total_time_ms);
        format!("{:.1}s", time.as_secs_f64())
    }

    pub fn outcome_display(&self) -> &'static str {
        match (self.status, self.final_status) {
            (AgentStatus::Completed, Some(status)) => status.as_str(),
            (AgentStatus::Completed, None) => "completed",
            _ => "DNF",
        }
    }
}

impl fmt::Display for BattleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Task: {}", self.task_id)?;
        for agent in [&self.traditional, &self.ralph] {
            writeln!(
                f,
                "{:<12} {:<8} {:>8} tokens {:>8} {:>3} iterations",
                agent.kind.display_name(),
                agent.outcome_display(),
                agent.total_tokens,
                agent.time_display(),
                agent.iterations,
            )?;
        }
        match self.winner {
            Some(winner) => {
                write!(f, "Winner: {}", winner.display_name())?;
                if let Some(savings) = self.token_savings() {
                    write!(f, " ({savings:.0}% fewer tokens)")?;
                }
                Ok(())
            }
            None => write!(f, "Winner: none"),
        }
    }
}
