//! HTTP request handlers for the Arena control API.

pub mod arena;
