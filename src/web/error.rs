//! Web error types for the Arena control API.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::agent::AgentError;

/// Error type for web API operations.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict error (e.g., an attempt is already in flight).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The battle backend is rate limiting us.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The battle backend failed or could not be reached.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not Found", Some(msg.clone())),
            WebError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            WebError::RateLimited { message, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate Limited",
                Some(message.clone()),
            ),
            WebError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Bad Gateway", Some(msg.clone()))
            }
            WebError::Internal(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
            details,
        });

        let mut response = (status, body).into_response();
        if let WebError::RateLimited {
            retry_after: Some(retry_after),
            ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AgentError> for WebError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::RateLimited {
                message,
                retry_after,
            } => WebError::RateLimited {
                message,
                retry_after,
            },
            AgentError::NoSession => WebError::NotFound(err.to_string()),
            AgentError::AttemptInFlight { .. } | AgentError::AgentCompleted(_) => {
                WebError::Conflict(err.to_string())
            }
            AgentError::Transport(_) | AgentError::Decode(_) | AgentError::Remote(_) => {
                WebError::Upstream(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> Self {
        WebError::Internal(err.to_string())
    }
}
