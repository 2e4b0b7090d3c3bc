//! Battle Session State - the shared, versioned, fenced session record

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use super::session::{AgentState, BattleSession, BattleStatus, SessionId};
use crate::agent::{AgentError, AgentKind, AttemptPayload, CompletePayload};

/// A guarded merge of one agent's snapshot, keyed by that agent
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub agent: AgentKind,
    pub state: AgentState,
    pub battle_status: BattleStatus,
    pub winner: Option<AgentKind>,
}

impl SessionUpdate {
    pub fn from_attempt(agent: AgentKind, payload: AttemptPayload) -> Self {
        Self::keyed(agent, payload.agent_state, payload.battle_status, None)
    }

    pub fn from_complete(agent: AgentKind, payload: CompletePayload) -> Self {
        Self::keyed(
            agent,
            payload.agent_state,
            payload.battle_status,
            payload.winner,
        )
    }

    fn keyed(
        agent: AgentKind,
        mut state: AgentState,
        battle_status: BattleStatus,
        winner: Option<AgentKind>,
    ) -> Self {
        if state.kind != agent {
            tracing::warn!(
                agent = %agent,
                payload_agent = %state.kind,
                "Snapshot names a different agent; keying by the attempt's agent"
            );
            state.kind = agent;
        }
        Self {
            agent,
            state,
            battle_status,
            winner,
        }
    }
}

/// Result of a fenced update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied { version: u64 },
    /// The update targeted a superseded session and was discarded
    Stale,
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied { .. })
    }
}

/// Holder of the live [`BattleSession`].
///
/// Every mutation names the session it targets; mutations whose target is not
/// the live session are discarded. `version` increases on every applied change.
#[derive(Default)]
pub struct SessionStore {
    live: RwLock<Option<BattleSession>>,
    version: AtomicU64,
    in_flight: Mutex<HashSet<(SessionId, AgentKind)>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<BattleSession> {
        self.live.read().clone()
    }

    pub fn live_id(&self) -> Option<SessionId> {
        self.live.read().as_ref().map(|session| session.id)
    }

    pub fn is_live(&self, fence: SessionId) -> bool {
        self.live_id() == Some(fence)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Replace the live session wholesale, returning the superseded one
    pub fn install(&self, session: BattleSession) -> Option<BattleSession> {
        let mut live = self.live.write();
        self.bump();
        live.replace(session)
    }

    /// Drop the live session
    pub fn discard(&self) -> Option<BattleSession> {
        let mut live = self.live.write();
        let previous = live.take();
        if previous.is_some() {
            self.bump();
        }
        previous
    }

    /// Run `f` against the live session if `fence` still names it.
    ///
    /// The read lock is held while `f` runs, so nothing can supersede the
    /// session in the meantime.
    pub fn with_live<R>(&self, fence: SessionId, f: impl FnOnce(&BattleSession) -> R) -> Option<R> {
        let live = self.live.read();
        match live.as_ref() {
            Some(session) if session.id == fence => Some(f(session)),
            _ => None,
        }
    }

    pub fn merge(&self, fence: SessionId, update: SessionUpdate) -> MergeOutcome {
        self.mutate(fence, |session| {
            session.apply_snapshot(
                update.agent,
                update.state,
                update.battle_status,
                update.winner,
            )
        })
    }

    pub fn mutate(&self, fence: SessionId, f: impl FnOnce(&mut BattleSession)) -> MergeOutcome {
        let mut live = self.live.write();
        match live.as_mut() {
            Some(session) if session.id == fence => {
                f(session);
                MergeOutcome::Applied {
                    version: self.bump(),
                }
            }
            _ => {
                tracing::debug!(session = %fence, "Discarding update for superseded session");
                MergeOutcome::Stale
            }
        }
    }

    /// Claim the single in-flight attempt slot for `(fence, agent)`
    pub fn begin_attempt(
        &self,
        fence: SessionId,
        agent: AgentKind,
    ) -> Result<AttemptLease<'_>, AgentError> {
        if !self.in_flight.lock().insert((fence, agent)) {
            return Err(AgentError::AttemptInFlight {
                session: fence,
                agent,
            });
        }
        Ok(AttemptLease {
            store: self,
            key: (fence, agent),
        })
    }

    pub fn attempt_in_flight(&self, fence: SessionId, agent: AgentKind) -> bool {
        self.in_flight.lock().contains(&(fence, agent))
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Releases the in-flight slot when dropped
pub struct AttemptLease<'a> {
    store: &'a SessionStore,
    key: (SessionId, AgentKind),
}

impl Drop for AttemptLease<'_> {
    fn drop(&mut self) {
        self.store.in_flight.lock().remove(&self.key);
    }
}
