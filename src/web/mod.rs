//! HTTP control surface for the arena.
//!
//! Exposes the control commands and the read interface to a UI layer. Owns no
//! orchestration logic.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::WebError;
pub use server::{build_router, run_server, ServerConfig};
pub use state::WebAppState;
