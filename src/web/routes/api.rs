//! REST API route definitions.

use axum::{
    routing::{get, post},
    Router,
};

use crate::web::handlers::arena;
use crate::web::state::WebAppState;

/// Build the API router with all REST endpoints.
pub fn api_routes() -> Router<WebAppState> {
    Router::new()
        .route("/arena", get(arena::get_arena))
        .route("/arena/start", post(arena::start_arena))
        .route("/arena/pause", post(arena::pause_arena))
        .route("/arena/resume", post(arena::resume_arena))
        .route("/arena/reset", post(arena::reset_arena))
        .route("/arena/events", get(arena::arena_events))
}
