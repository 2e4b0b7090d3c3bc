//! Shared state for the web server.

use crate::battle::Arena;

/// Shared application state for Axum handlers.
#[derive(Clone)]
pub struct WebAppState {
    arena: Arena,
}

impl WebAppState {
    pub fn new(arena: Arena) -> Self {
        Self { arena }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }
}
