//! Dual-Agent Scheduler - advances both agents round by round

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use super::buffer::{RateLimitFlag, StreamingBuffers};
use super::controller::AgentRunController;
use super::session::SessionId;
use super::store::SessionStore;
use crate::agent::{AgentError, AgentKind, GenerationEndpoint};

const EVENT_CAPACITY: usize = 64;

/// Scheduler state as seen by the control surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Stopped,
    RoundStarting,
    RoundInFlight,
    Paused,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::RoundStarting => "round_starting",
            SchedulerState::RoundInFlight => "round_in_flight",
            SchedulerState::Paused => "paused",
        }
    }

    /// A round is being prepared or is running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SchedulerState::RoundStarting | SchedulerState::RoundInFlight
        )
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control flag read by the loop at its checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlSignal {
    #[default]
    Run,
    Pause,
    Stop,
}

/// Transient notification for the control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaEvent {
    AgentFailed {
        agent: AgentKind,
        message: String,
    },
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    BattleFinished {
        winner: Option<AgentKind>,
    },
    RoundSettled {
        round: u64,
    },
}

/// Why a battle loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Both agents completed
    Finished,
    RateLimited,
    /// A stop signal was observed
    Stopped,
    /// The session the loop was driving is no longer live
    Superseded,
}

/// State shared between the control facade and the running loop.
///
/// Everything a loop publishes is fenced by its session id, so a loop that
/// outlives a reset cannot disturb the state of the next battle. Session state
/// and buffers are written only from inside the crate:
///
/// ```compile_fail
/// let shared = arena::battle::BattleShared::new();
/// shared.sessions.discard();
/// ```
pub struct BattleShared {
    pub(crate) sessions: SessionStore,
    pub(crate) buffers: StreamingBuffers,
    pub(crate) rate_limit: RateLimitFlag,
    control: watch::Sender<ControlSignal>,
    state: watch::Sender<SchedulerState>,
    events: broadcast::Sender<ArenaEvent>,
    round: AtomicU64,
}

impl Default for BattleShared {
    fn default() -> Self {
        Self::new()
    }
}

impl BattleShared {
    pub fn new() -> Self {
        let (control, _) = watch::channel(ControlSignal::Run);
        let (state, _) = watch::channel(SchedulerState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: SessionStore::new(),
            buffers: StreamingBuffers::new(),
            rate_limit: RateLimitFlag::new(),
            control,
            state,
            events,
            round: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ArenaEvent> {
        self.events.subscribe()
    }

    pub fn control(&self) -> ControlSignal {
        *self.control.borrow()
    }

    pub fn signal(&self, signal: ControlSignal) {
        self.control.send_replace(signal);
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_rounds(&self) {
        self.round.store(0, Ordering::SeqCst);
    }

    fn next_round(&self) -> u64 {
        self.round.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish a state on behalf of the control facade (not fenced)
    pub(crate) fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Scheduler state changed");
        }
    }

    /// Publish a state if `fence` is still the live session
    fn publish(&self, fence: SessionId, state: SchedulerState) -> bool {
        self.sessions
            .with_live(fence, |_| self.set_state(state))
            .is_some()
    }

    /// Send a notification if `fence` is still the live session
    fn notify(&self, fence: SessionId, event: ArenaEvent) {
        self.sessions.with_live(fence, |_| {
            // No subscribers is fine
            let _ = self.events.send(event);
        });
    }
}

/// The explicit round loop for one session.
///
/// Checkpoints are the top of each round and the end of the pacing delay; pause
/// and stop are only honored there, never mid-round.
pub struct BattleLoop {
    shared: Arc<BattleShared>,
    endpoint: Arc<dyn GenerationEndpoint>,
    fence: SessionId,
    pacing: Duration,
}

impl BattleLoop {
    pub fn new(
        shared: Arc<BattleShared>,
        endpoint: Arc<dyn GenerationEndpoint>,
        fence: SessionId,
        pacing: Duration,
    ) -> Self {
        Self {
            shared,
            endpoint,
            fence,
            pacing,
        }
    }

    pub async fn run(self) -> LoopExit {
        let mut control = self.shared.control.subscribe();

        loop {
            if let Some(exit) = self.checkpoint(&mut control).await {
                return exit;
            }

            let Some(pending) = self
                .shared
                .sessions
                .with_live(self.fence, |session| session.pending_agents())
            else {
                return LoopExit::Superseded;
            };
            if pending.is_empty() {
                return self.finish();
            }

            if let Some(exit) = self.run_round(&pending).await {
                return exit;
            }

            if self.shared.control() == ControlSignal::Pause {
                // Checkpoint parks the loop
                continue;
            }

            if !self.shared.publish(self.fence, SchedulerState::RoundStarting) {
                return LoopExit::Superseded;
            }
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
    }

    /// Wait while paused. Returns an exit when the loop must not continue.
    async fn checkpoint(&self, control: &mut watch::Receiver<ControlSignal>) -> Option<LoopExit> {
        loop {
            if !self.shared.sessions.is_live(self.fence) {
                return Some(LoopExit::Superseded);
            }

            let signal = *control.borrow_and_update();
            match signal {
                ControlSignal::Run => return None,
                ControlSignal::Stop => {
                    self.shared.publish(self.fence, SchedulerState::Stopped);
                    return Some(LoopExit::Stopped);
                }
                ControlSignal::Pause => {
                    if !self.shared.publish(self.fence, SchedulerState::Paused) {
                        return Some(LoopExit::Superseded);
                    }
                    if control.changed().await.is_err() {
                        return Some(LoopExit::Stopped);
                    }
                }
            }
        }
    }

    /// Launch one controller per pending agent and join on all of them
    async fn run_round(&self, pending: &[AgentKind]) -> Option<LoopExit> {
        let round = self.shared.next_round();
        if !self.shared.publish(self.fence, SchedulerState::RoundStarting) {
            return Some(LoopExit::Superseded);
        }
        tracing::info!(session = %self.fence, round, agents = ?pending, "Round starting");

        if !self.shared.publish(self.fence, SchedulerState::RoundInFlight) {
            return Some(LoopExit::Superseded);
        }

        let attempts = pending.iter().map(|&agent| async move {
            let result = AgentRunController::new(
                self.fence,
                agent,
                self.endpoint.as_ref(),
                &self.shared.sessions,
                &self.shared.buffers,
            )
            .run()
            .await;
            (agent, result)
        });
        let results = join_all(attempts).await;

        let mut rate_limited: Option<AgentError> = None;
        for (agent, result) in results {
            match result {
                Ok(_) => {}
                Err(err) if err.is_rate_limited() => {
                    rate_limited.get_or_insert(err);
                }
                Err(err) => {
                    self.shared.notify(
                        self.fence,
                        ArenaEvent::AgentFailed {
                            agent,
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        tracing::info!(session = %self.fence, round, "Round settled");
        self.shared
            .notify(self.fence, ArenaEvent::RoundSettled { round });

        if let Some(err) = rate_limited {
            return Some(self.halt_on_rate_limit(err));
        }

        let both_completed = self
            .shared
            .sessions
            .with_live(self.fence, |session| session.both_completed());
        match both_completed {
            None => Some(LoopExit::Superseded),
            Some(true) => Some(self.finish()),
            Some(false) => None,
        }
    }

    fn halt_on_rate_limit(&self, err: AgentError) -> LoopExit {
        tracing::warn!(session = %self.fence, error = %err, "Rate limited, stopping battle");

        let first = self
            .shared
            .sessions
            .with_live(self.fence, |_| self.shared.rate_limit.raise());
        if first == Some(true) {
            self.shared.notify(
                self.fence,
                ArenaEvent::RateLimited {
                    message: err.to_string(),
                    retry_after_secs: err.retry_after().map(|delay| delay.as_secs()),
                },
            );
        }

        if self.shared.publish(self.fence, SchedulerState::Stopped) {
            LoopExit::RateLimited
        } else {
            LoopExit::Superseded
        }
    }

    fn finish(&self) -> LoopExit {
        let winner = self
            .shared
            .sessions
            .with_live(self.fence, |session| {
                self.shared.set_state(SchedulerState::Stopped);
                session.winner
            });

        match winner {
            Some(winner) => {
                tracing::info!(session = %self.fence, winner = ?winner, "Battle finished");
                self.shared
                    .notify(self.fence, ArenaEvent::BattleFinished { winner });
                LoopExit::Finished
            }
            None => LoopExit::Superseded,
        }
    }
}
