//! Mock generation endpoint for deterministic testing
//!
//! Implements [`GenerationEndpoint`] by replaying pre-scripted attempts per agent
//! without touching the network. Each `open_stream` call consumes the next
//! scripted attempt for that agent; a following `iterate` call (the fallback)
//! uses the same attempt's fallback result. All calls are captured with their
//! timestamps for later assertions.
//!
//! # Example
//! ```no_run
//! use arena::agent::mock::{MockAttempt, MockEndpoint, MockEventBuilder};
//! use arena::agent::AgentKind;
//! use arena::battle::{AgentState, AgentStatus, BattleStatus, FinalStatus};
//!
//! let done = AgentState::new(AgentKind::Fresh)
//!     .with_status(AgentStatus::Completed)
//!     .with_final_status(FinalStatus::Success);
//!
//! let endpoint = MockEndpoint::new().with_attempt(
//!     AgentKind::Fresh,
//!     MockAttempt::streaming(
//!         MockEventBuilder::new(AgentKind::Fresh)
//!             .start()
//!             .chunk("function TodoApp() {")
//!             .complete(done, BattleStatus::Running, None)
//!             .build(),
//!     ),
//! );
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::agent::endpoint::{AgentKind, GenerationEndpoint, RawEventChannel};
use crate::agent::error::AgentError;
use crate::agent::events::{AttemptPayload, CompletePayload, StreamEvent};
use crate::battle::{AgentState, BattleSession, BattleStatus, SessionId};

/// One item delivered on a mock stream
#[derive(Clone, Debug)]
pub enum MockFrame {
    /// Raw message payload
    Message(String),
    /// Transport failure; the stream ends after it
    TransportError(String),
    /// Pause before the next frame
    Delay(Duration),
}

/// How `open_stream` behaves for a scripted attempt
#[derive(Clone, Debug)]
pub enum MockOpen {
    Stream(Vec<MockFrame>),
    Fail(AgentError),
}

/// One scripted iteration attempt
#[derive(Clone, Debug)]
pub struct MockAttempt {
    pub open: MockOpen,
    pub open_delay: Duration,
    pub fallback: Option<Result<CompletePayload, AgentError>>,
    pub fallback_delay: Duration,
}

impl MockAttempt {
    /// Attempt whose stream delivers `frames`
    pub fn streaming(frames: Vec<MockFrame>) -> Self {
        Self {
            open: MockOpen::Stream(frames),
            open_delay: Duration::ZERO,
            fallback: None,
            fallback_delay: Duration::ZERO,
        }
    }

    /// Attempt whose stream cannot be opened
    pub fn open_failure(error: AgentError) -> Self {
        Self {
            open: MockOpen::Fail(error),
            open_delay: Duration::ZERO,
            fallback: None,
            fallback_delay: Duration::ZERO,
        }
    }

    /// Streamed `start` then `complete` with the given snapshot
    pub fn completing(
        agent: AgentKind,
        state: AgentState,
        battle_status: BattleStatus,
        winner: Option<AgentKind>,
    ) -> Self {
        Self::streaming(
            MockEventBuilder::new(agent)
                .start()
                .complete(state, battle_status, winner)
                .build(),
        )
    }

    /// Configure the result of the synchronous fallback call
    pub fn with_fallback(mut self, result: Result<CompletePayload, AgentError>) -> Self {
        self.fallback = Some(result);
        self
    }

    /// Configure a delay before the stream opens (or fails to)
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Configure a delay before the fallback call returns
    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCallKind {
    OpenStream,
    Iterate,
    CreateSession,
    StartSession,
    ResetSession,
}

/// A captured endpoint call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub kind: MockCallKind,
    pub session: Option<SessionId>,
    pub agent: Option<AgentKind>,
    pub at: Instant,
}

type ScriptedFallback = (Option<Result<CompletePayload, AgentError>>, Duration);

/// Mock endpoint for testing
pub struct MockEndpoint {
    scripts: Mutex<HashMap<AgentKind, VecDeque<MockAttempt>>>,
    pending_fallbacks: Mutex<HashMap<AgentKind, ScriptedFallback>>,
    event_delay: Duration,
    create_error: Option<AgentError>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            pending_fallbacks: Mutex::new(HashMap::new()),
            event_delay: Duration::ZERO,
            create_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue an attempt for `agent`
    pub fn with_attempt(self, agent: AgentKind, attempt: MockAttempt) -> Self {
        self.push_attempt(agent, attempt);
        self
    }

    /// Delay between stream frames (default: Duration::ZERO)
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Make `create_session` fail
    pub fn failing_create(mut self, error: AgentError) -> Self {
        self.create_error = Some(error);
        self
    }

    /// Queue an attempt after construction
    pub fn push_attempt(&self, agent: AgentKind, attempt: MockAttempt) {
        self.scripts
            .lock()
            .entry(agent)
            .or_default()
            .push_back(attempt);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, kind: MockCallKind, agent: AgentKind) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.kind == kind && call.agent == Some(agent))
            .cloned()
            .collect()
    }

    pub fn stream_calls(&self, agent: AgentKind) -> usize {
        self.calls_of(MockCallKind::OpenStream, agent).len()
    }

    pub fn fallback_calls(&self, agent: AgentKind) -> usize {
        self.calls_of(MockCallKind::Iterate, agent).len()
    }

    pub fn remaining_attempts(&self, agent: AgentKind) -> usize {
        self.scripts.lock().get(&agent).map_or(0, VecDeque::len)
    }

    fn record(&self, kind: MockCallKind, session: Option<SessionId>, agent: Option<AgentKind>) {
        self.calls.lock().push(MockCall {
            kind,
            session,
            agent,
            at: Instant::now(),
        });
    }

    fn next_attempt(&self, agent: AgentKind) -> Option<MockAttempt> {
        self.scripts.lock().get_mut(&agent).and_then(VecDeque::pop_front)
    }

    fn spawn_stream(&self, frames: Vec<MockFrame>) -> RawEventChannel {
        let (tx, rx) = mpsc::channel(32);
        let delay = self.event_delay;

        tokio::spawn(async move {
            for frame in frames {
                match frame {
                    MockFrame::Delay(pause) => tokio::time::sleep(pause).await,
                    MockFrame::Message(message) => {
                        if delay > Duration::ZERO {
                            tokio::time::sleep(delay).await;
                        }
                        if tx.send(Ok(message)).await.is_err() {
                            break; // Receiver dropped
                        }
                    }
                    MockFrame::TransportError(message) => {
                        let _ = tx.send(Err(AgentError::Transport(message))).await;
                        break;
                    }
                }
            }
        });

        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

#[async_trait]
impl GenerationEndpoint for MockEndpoint {
    async fn open_stream(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<RawEventChannel, AgentError> {
        self.record(MockCallKind::OpenStream, Some(session), Some(agent));

        let Some(attempt) = self.next_attempt(agent) else {
            return Err(AgentError::Transport(format!(
                "no scripted attempt for {agent}"
            )));
        };

        self.pending_fallbacks
            .lock()
            .insert(agent, (attempt.fallback, attempt.fallback_delay));

        if attempt.open_delay > Duration::ZERO {
            tokio::time::sleep(attempt.open_delay).await;
        }

        match attempt.open {
            MockOpen::Stream(frames) => Ok(self.spawn_stream(frames)),
            MockOpen::Fail(error) => Err(error),
        }
    }

    async fn iterate(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<CompletePayload, AgentError> {
        self.record(MockCallKind::Iterate, Some(session), Some(agent));

        let pending = self.pending_fallbacks.lock().remove(&agent);
        let (scripted, delay) = match pending {
            Some(pending) => pending,
            None => match self.next_attempt(agent) {
                Some(attempt) => (attempt.fallback, attempt.fallback_delay),
                None => (None, Duration::ZERO),
            },
        };

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        scripted.unwrap_or_else(|| {
            Err(AgentError::Remote(format!(
                "no scripted fallback for {agent}"
            )))
        })
    }

    async fn create_session(&self, task_id: &str) -> Result<BattleSession, AgentError> {
        self.record(MockCallKind::CreateSession, None, None);
        if let Some(error) = &self.create_error {
            return Err(error.clone());
        }
        Ok(BattleSession::new(task_id))
    }

    async fn start_session(&self, session: SessionId) -> Result<(), AgentError> {
        self.record(MockCallKind::StartSession, Some(session), None);
        Ok(())
    }

    async fn reset_session(&self, session: SessionId) -> Result<(), AgentError> {
        self.record(MockCallKind::ResetSession, Some(session), None);
        Ok(())
    }
}

/// Builder for realistic mock stream sequences
pub struct MockEventBuilder {
    agent: AgentKind,
    frames: Vec<MockFrame>,
}

impl MockEventBuilder {
    pub fn new(agent: AgentKind) -> Self {
        Self {
            agent,
            frames: Vec::new(),
        }
    }

    fn event(mut self, event: StreamEvent) -> Self {
        let message = serde_json::to_string(&event).unwrap_or_default();
        self.frames.push(MockFrame::Message(message));
        self
    }

    pub fn start(self) -> Self {
        let agent = self.agent;
        self.event(StreamEvent::Start { agent: Some(agent) })
    }

    pub fn chunk(self, content: &str) -> Self {
        self.event(StreamEvent::Chunk {
            content: content.to_string(),
        })
    }

    pub fn attempt_complete(self, agent_state: AgentState, battle_status: BattleStatus) -> Self {
        self.event(StreamEvent::AttemptComplete(AttemptPayload {
            agent_state,
            battle_status,
        }))
    }

    pub fn complete(
        self,
        agent_state: AgentState,
        battle_status: BattleStatus,
        winner: Option<AgentKind>,
    ) -> Self {
        self.event(StreamEvent::Complete(CompletePayload {
            agent_state,
            battle_status,
            winner,
        }))
    }

    pub fn error(self, message: &str) -> Self {
        self.event(StreamEvent::Error {
            message: message.to_string(),
        })
    }

    /// Add a raw (possibly malformed) payload
    pub fn raw(mut self, payload: &str) -> Self {
        self.frames.push(MockFrame::Message(payload.to_string()));
        self
    }

    pub fn transport_error(mut self, message: &str) -> Self {
        self.frames
            .push(MockFrame::TransportError(message.to_string()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.frames.push(MockFrame::Delay(delay));
        self
    }

    pub fn build(self) -> Vec<MockFrame> {
        self.frames
    }
}
