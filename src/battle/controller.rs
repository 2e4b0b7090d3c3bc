//! Agent Run Controller - drives one iteration attempt for one agent

use futures::StreamExt;

use super::buffer::StreamingBuffers;
use super::session::{AgentState, SessionId};
use super::store::{SessionStore, SessionUpdate};
use crate::agent::{
    AgentError, AgentKind, CompletePayload, EventDecoder, GenerationEndpoint, StreamEvent,
};

/// Phase of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// Opening the incremental channel
    Opening,
    /// Consuming decoded events
    Streaming,
    /// Waiting on the synchronous fallback call
    Settling,
    Done,
    Failed,
}

impl AttemptPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptPhase::Done | AttemptPhase::Failed)
    }
}

/// Executes exactly one iteration attempt for one agent of one session.
///
/// The only writes it performs are fenced merges into the [`SessionStore`] and
/// updates to its own agent's streaming buffer.
pub struct AgentRunController<'a> {
    fence: SessionId,
    agent: AgentKind,
    endpoint: &'a dyn GenerationEndpoint,
    sessions: &'a SessionStore,
    buffers: &'a StreamingBuffers,
    phase: AttemptPhase,
}

impl<'a> AgentRunController<'a> {
    pub fn new(
        fence: SessionId,
        agent: AgentKind,
        endpoint: &'a dyn GenerationEndpoint,
        sessions: &'a SessionStore,
        buffers: &'a StreamingBuffers,
    ) -> Self {
        Self {
            fence,
            agent,
            endpoint,
            sessions,
            buffers,
            phase: AttemptPhase::Opening,
        }
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    /// Run the attempt to resolution.
    ///
    /// Resolves exactly once; the agent's streaming buffer is gone afterwards.
    pub async fn run(mut self) -> Result<AgentState, AgentError> {
        let pending = self
            .sessions
            .with_live(self.fence, |session| {
                !session.agent(self.agent).is_completed()
            })
            .ok_or(AgentError::NoSession)?;
        if !pending {
            return Err(AgentError::AgentCompleted(self.agent));
        }

        let _lease = self.sessions.begin_attempt(self.fence, self.agent)?;
        let result = self.drive().await;
        self.buffers.remove(self.fence, self.agent);

        match &result {
            Ok(state) => tracing::debug!(
                session = %self.fence,
                agent = %self.agent,
                status = ?state.status,
                final_status = ?state.final_status,
                "Attempt resolved"
            ),
            Err(err) => tracing::warn!(
                session = %self.fence,
                agent = %self.agent,
                error = %err,
                "Attempt failed"
            ),
        }
        result
    }

    async fn drive(&mut self) -> Result<AgentState, AgentError> {
        self.phase = AttemptPhase::Opening;
        let channel = match self.endpoint.open_stream(self.fence, self.agent).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(
                    session = %self.fence,
                    agent = %self.agent,
                    error = %err,
                    "Failed to open stream, falling back to synchronous call"
                );
                return self.fallback().await;
            }
        };

        self.phase = AttemptPhase::Streaming;
        let mut events = EventDecoder::new(channel);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if let Some(resolution) = self.handle_event(event) {
                        return resolution;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        session = %self.fence,
                        agent = %self.agent,
                        error = %err,
                        "Stream transport failed"
                    );
                    break;
                }
            }
        }
        drop(events);

        tracing::warn!(
            session = %self.fence,
            agent = %self.agent,
            "Stream ended without a terminal event, falling back to synchronous call"
        );
        self.fallback().await
    }

    /// Apply one decoded event. Returns the resolution once a terminal event arrives.
    ///
    /// Events observed outside `Streaming` (in particular after a terminal event)
    /// are ignored.
    pub fn handle_event(&mut self, event: StreamEvent) -> Option<Result<AgentState, AgentError>> {
        if self.phase != AttemptPhase::Streaming {
            tracing::trace!(
                agent = %self.agent,
                event = event.event_type_name(),
                phase = ?self.phase,
                "Ignoring event outside streaming phase"
            );
            return None;
        }

        match event {
            StreamEvent::Start { .. } => {
                self.buffers.begin(self.fence, self.agent);
                None
            }
            StreamEvent::Chunk { content } => {
                self.buffers.append(self.fence, self.agent, &content);
                None
            }
            StreamEvent::AttemptComplete(payload) => {
                tracing::debug!(
                    session = %self.fence,
                    agent = %self.agent,
                    "Remote retried within attempt"
                );
                self.sessions
                    .merge(self.fence, SessionUpdate::from_attempt(self.agent, payload));
                self.buffers.clear(self.fence, self.agent);
                None
            }
            StreamEvent::Complete(payload) => Some(Ok(self.settle(payload))),
            StreamEvent::Error { message } => {
                self.phase = AttemptPhase::Failed;
                Some(Err(AgentError::from_remote_message(message)))
            }
        }
    }

    async fn fallback(&mut self) -> Result<AgentState, AgentError> {
        self.phase = AttemptPhase::Settling;
        match self.endpoint.iterate(self.fence, self.agent).await {
            Ok(payload) => Ok(self.settle(payload)),
            Err(err) => {
                self.phase = AttemptPhase::Failed;
                Err(err)
            }
        }
    }

    fn settle(&mut self, payload: CompletePayload) -> AgentState {
        let update = SessionUpdate::from_complete(self.agent, payload);
        let state = update.state.clone();
        self.sessions.merge(self.fence, update);
        self.buffers.remove(self.fence, self.agent);
        self.phase = AttemptPhase::Done;
        state
    }
}
