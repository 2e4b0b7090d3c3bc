//! Arena - the control facade over the battle loop
//!
//! Exposes the `start`/`pause`/`resume`/`reset` commands and the read interface
//! the control surface renders from. Owns no orchestration logic beyond
//! spawning a [`BattleLoop`] for the live session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};

use super::scheduler::{ArenaEvent, BattleLoop, BattleShared, ControlSignal, SchedulerState};
use super::session::{BattleSession, SessionId};
use crate::agent::{AgentError, AgentKind, GenerationEndpoint};

pub const DEFAULT_TASK_ID: &str = "todo-component";
pub const DEFAULT_ROUND_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct ArenaOptions {
    /// Task the battle is created for
    pub task_id: String,
    /// Pacing delay between rounds
    pub round_delay: Duration,
}

impl Default for ArenaOptions {
    fn default() -> Self {
        Self {
            task_id: DEFAULT_TASK_ID.to_string(),
            round_delay: DEFAULT_ROUND_DELAY,
        }
    }
}

/// Everything the control surface reads, captured together
#[derive(Debug, Clone, Serialize)]
pub struct ArenaSnapshot {
    pub state: SchedulerState,
    pub session: Option<BattleSession>,
    pub streaming: BTreeMap<AgentKind, String>,
    pub rate_limited: bool,
    pub round: u64,
    pub version: u64,
}

/// Cloneable handle to one arena
#[derive(Clone)]
pub struct Arena {
    shared: Arc<BattleShared>,
    endpoint: Arc<dyn GenerationEndpoint>,
    options: ArenaOptions,
    commands: Arc<Mutex<()>>,
}

impl Arena {
    pub fn new(endpoint: Arc<dyn GenerationEndpoint>, options: ArenaOptions) -> Self {
        Self {
            shared: Arc::new(BattleShared::new()),
            endpoint,
            options,
            commands: Arc::new(Mutex::new(())),
        }
    }

    pub fn options(&self) -> &ArenaOptions {
        &self.options
    }

    /// Start (or continue) a battle and return the live session id.
    ///
    /// Creates a session when none is live or the live one has finished. While
    /// paused this behaves as [`Arena::resume`]; while a round is active it is a
    /// no-op.
    pub async fn start(&self) -> Result<SessionId, AgentError> {
        let _guard = self.commands.lock().await;

        match self.shared.state() {
            SchedulerState::Paused => {
                self.shared.signal(ControlSignal::Run);
                return self.shared.sessions.live_id().ok_or(AgentError::NoSession);
            }
            state if state.is_active() => {
                tracing::debug!(state = %state, "Start ignored, battle already running");
                return self.shared.sessions.live_id().ok_or(AgentError::NoSession);
            }
            _ => {}
        }

        let reusable = self
            .shared
            .sessions
            .snapshot()
            .filter(|session| !session.both_completed())
            .map(|session| session.id);

        let fence = match reusable {
            Some(id) => {
                tracing::info!(session = %id, "Continuing battle");
                id
            }
            None => {
                let mut session = self.endpoint.create_session(&self.options.task_id).await?;
                self.endpoint.start_session(session.id).await?;
                session.mark_started();
                let id = session.id;
                self.shared.sessions.install(session);
                tracing::info!(session = %id, task_id = %self.options.task_id, "Battle created");
                id
            }
        };

        self.shared.rate_limit.clear();
        self.shared.buffers.claim(fence);
        self.shared.reset_rounds();
        self.shared.signal(ControlSignal::Run);
        self.shared.set_state(SchedulerState::RoundStarting);

        let battle = BattleLoop::new(
            self.shared.clone(),
            self.endpoint.clone(),
            fence,
            self.options.round_delay,
        );
        tokio::spawn(async move {
            let exit = battle.run().await;
            tracing::info!(session = %fence, exit = ?exit, "Battle loop exited");
        });

        Ok(fence)
    }

    /// Request a pause; honored once the in-flight round settles
    pub async fn pause(&self) {
        let _guard = self.commands.lock().await;
        if self.shared.state() == SchedulerState::Stopped {
            return;
        }
        self.shared.signal(ControlSignal::Pause);
    }

    pub async fn resume(&self) {
        let _guard = self.commands.lock().await;
        if self.shared.control() == ControlSignal::Pause {
            self.shared.signal(ControlSignal::Run);
        }
    }

    /// Discard the live session and return to `Stopped`.
    ///
    /// In-flight attempts keep running; their results are discarded by the
    /// session fence. The remote side is told best-effort.
    pub async fn reset(&self) {
        let _guard = self.commands.lock().await;

        self.shared.signal(ControlSignal::Stop);
        let previous = self.shared.sessions.discard();
        self.shared.rate_limit.clear();
        self.shared.buffers.release();
        self.shared.reset_rounds();
        self.shared.set_state(SchedulerState::Stopped);

        if let Some(previous) = previous {
            tracing::info!(session = %previous.id, "Battle reset");
            if let Err(err) = self.endpoint.reset_session(previous.id).await {
                tracing::warn!(session = %previous.id, error = %err, "Remote reset failed");
            }
        }
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        let session = self.shared.sessions.snapshot();
        let streaming = session
            .as_ref()
            .map(|session| self.shared.buffers.snapshot(session.id))
            .unwrap_or_default();
        ArenaSnapshot {
            state: self.shared.state(),
            session,
            streaming,
            rate_limited: self.shared.rate_limit.is_raised(),
            round: self.shared.round(),
            version: self.shared.sessions.version(),
        }
    }

    pub fn session(&self) -> Option<BattleSession> {
        self.shared.sessions.snapshot()
    }

    pub fn streaming(&self) -> BTreeMap<AgentKind, String> {
        self.shared
            .sessions
            .live_id()
            .map(|id| self.shared.buffers.snapshot(id))
            .unwrap_or_default()
    }

    pub fn rate_limited(&self) -> bool {
        self.shared.rate_limit.is_raised()
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.shared.subscribe_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.shared.subscribe_events()
    }

    /// Resolve once the scheduler reaches `state`
    pub async fn wait_for_state(&self, state: SchedulerState) {
        let mut states = self.subscribe_state();
        // The sender lives as long as `self`
        let _ = states.wait_for(|current| *current == state).await;
    }

    pub async fn wait_until_stopped(&self) {
        self.wait_for_state(SchedulerState::Stopped).await;
    }
}
