//! Arena handlers for the control API.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::battle::{ArenaEvent, ArenaSnapshot, SessionId};
use crate::web::error::WebError;
use crate::web::state::WebAppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Response for the start command.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub snapshot: ArenaSnapshot,
}

/// Get the current arena snapshot.
pub async fn get_arena(State(state): State<WebAppState>) -> Json<ArenaSnapshot> {
    Json(state.arena().snapshot())
}

/// Start (or continue) a battle.
pub async fn start_arena(
    State(state): State<WebAppState>,
) -> Result<Json<StartResponse>, WebError> {
    let session_id = state.arena().start().await?;
    Ok(Json(StartResponse {
        session_id,
        snapshot: state.arena().snapshot(),
    }))
}

pub async fn pause_arena(State(state): State<WebAppState>) -> Json<ArenaSnapshot> {
    state.arena().pause().await;
    Json(state.arena().snapshot())
}

pub async fn resume_arena(State(state): State<WebAppState>) -> Json<ArenaSnapshot> {
    state.arena().resume().await;
    Json(state.arena().snapshot())
}

pub async fn reset_arena(State(state): State<WebAppState>) -> Json<ArenaSnapshot> {
    state.arena().reset().await;
    Json(state.arena().snapshot())
}

/// Stream arena notifications as server-sent events.
pub async fn arena_events(
    State(state): State<WebAppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.arena().subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match sse_event(&event) {
                    Some(sse) => return Some((Ok(sse), receiver)),
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn sse_event(event: &ArenaEvent) -> Option<Event> {
    let name = match event {
        ArenaEvent::AgentFailed { .. } => "agent_failed",
        ArenaEvent::RateLimited { .. } => "rate_limited",
        ArenaEvent::BattleFinished { .. } => "battle_finished",
        ArenaEvent::RoundSettled { .. } => "round_settled",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to encode arena event");
            None
        }
    }
}
