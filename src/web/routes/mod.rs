//! Route definitions for the Arena control API.

pub mod api;
