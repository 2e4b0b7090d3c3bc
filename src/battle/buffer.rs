//! Transient presentation-feed state: live preview buffers and the rate-limit flag

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use super::session::SessionId;
use crate::agent::AgentKind;

#[derive(Debug)]
struct Slot {
    session: SessionId,
    text: String,
}

/// In-progress text of each agent's current attempt.
///
/// One slot per agent, so the two controllers of a round never contend on a
/// slot. The buffers are owned by the live session: writes from any other
/// session are dropped, and reads filter by session.
#[derive(Default)]
pub struct StreamingBuffers {
    owner: RwLock<Option<SessionId>>,
    slots: [Mutex<Option<Slot>>; 2],
}

impl StreamingBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the buffers to `session`, dropping whatever was buffered before
    pub fn claim(&self, session: SessionId) {
        let mut owner = self.owner.write();
        *owner = Some(session);
        self.drain();
    }

    /// Drop every buffer and the owner
    pub fn release(&self) {
        let mut owner = self.owner.write();
        *owner = None;
        self.drain();
    }

    pub fn owner(&self) -> Option<SessionId> {
        *self.owner.read()
    }

    fn drain(&self) {
        for slot in &self.slots {
            *slot.lock() = None;
        }
    }

    /// Run `f` on the agent's slot if `session` owns the buffers
    fn write(&self, session: SessionId, agent: AgentKind, f: impl FnOnce(&mut Option<Slot>)) {
        let owner = self.owner.read();
        if *owner != Some(session) {
            tracing::trace!(session = %session, agent = %agent, "Dropping buffer write from non-owner");
            return;
        }
        f(&mut self.slots[agent.index()].lock());
    }

    /// Reset the agent's buffer to empty (a `start` event was observed)
    pub fn begin(&self, session: SessionId, agent: AgentKind) {
        self.write(session, agent, |slot| {
            *slot = Some(Slot {
                session,
                text: String::new(),
            })
        });
    }

    pub fn append(&self, session: SessionId, agent: AgentKind, fragment: &str) {
        self.write(session, agent, |slot| match slot.as_mut() {
            Some(existing) => existing.text.push_str(fragment),
            None => {
                *slot = Some(Slot {
                    session,
                    text: fragment.to_string(),
                })
            }
        });
    }

    /// Empty the buffer but keep the entry (internal retry)
    pub fn clear(&self, session: SessionId, agent: AgentKind) {
        self.write(session, agent, |slot| {
            if let Some(existing) = slot.as_mut() {
                existing.text.clear();
            }
        });
    }

    /// Remove the agent's entry (attempt resolved)
    pub fn remove(&self, session: SessionId, agent: AgentKind) {
        self.write(session, agent, |slot| *slot = None);
    }

    pub fn get(&self, session: SessionId, agent: AgentKind) -> Option<String> {
        self.slots[agent.index()]
            .lock()
            .as_ref()
            .filter(|existing| existing.session == session)
            .map(|existing| existing.text.clone())
    }

    /// Buffers belonging to `session`, keyed by agent
    pub fn snapshot(&self, session: SessionId) -> BTreeMap<AgentKind, String> {
        AgentKind::ALL
            .into_iter()
            .filter_map(|agent| self.get(session, agent).map(|text| (agent, text)))
            .collect()
    }
}

/// Process-wide latch gating the rate-limit notification to once per battle
#[derive(Debug, Default)]
pub struct RateLimitFlag(AtomicBool);

impl RateLimitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that set it.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
