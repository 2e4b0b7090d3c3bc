//! HTTP implementation of the Remote Generation Endpoint

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use reqwest_eventsource::{retry, Event, EventSource, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::endpoint::{AgentKind, GenerationEndpoint, RawEventChannel};
use crate::agent::error::AgentError;
use crate::agent::events::CompletePayload;
use crate::battle::{BattleSession, SessionId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CreateBattleRequest<'a> {
    task_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Value,
}

/// Talks to the battle backend over HTTP, streaming iterations via SSE.
///
/// The request timeout applies to synchronous calls only; streams are bounded
/// by the connect timeout and the backend's own behavior.
#[derive(Clone)]
pub struct HttpEndpoint {
    base_url: String,
    client: Client,
    request_timeout: Duration,
}

impl HttpEndpoint {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AgentError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn battle_url(&self, session: SessionId, path: &str) -> String {
        format!("{}/battles/{}{}", self.base_url, session, path)
    }

    fn iterate_url(&self, session: SessionId, agent: AgentKind) -> String {
        self.battle_url(session, &format!("/iterate/{}", agent.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AgentError> {
        let response = request.timeout(self.request_timeout).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, AgentError> {
        let text = self.send(request).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|err| AgentError::Decode(format!("{err} - {text}")))
    }
}

/// Map a non-2xx response to an [`AgentError`].
///
/// `429` is a rate limit carrying `Retry-After` (seconds) when present; anything
/// else is a remote failure with the body's `detail` or raw text.
pub async fn error_from_response(response: Response) -> AgentError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message = detail_message(&body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        }
    });

    if status == StatusCode::TOO_MANY_REQUESTS {
        AgentError::RateLimited {
            message,
            retry_after,
        }
    } else {
        AgentError::from_remote_message(message)
    }
}

fn detail_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        Value::String(detail) => Some(detail),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn into_channel(source: EventSource) -> RawEventChannel {
    stream::unfold(Some(source), |source| async move {
        let mut source = source?;
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => {
                    return Some((Ok(message.data), Some(source)));
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    source.close();
                    return None;
                }
                Some(Err(err)) => {
                    source.close();
                    return Some((Err(AgentError::Transport(err.to_string())), None));
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl GenerationEndpoint for HttpEndpoint {
    async fn open_stream(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<RawEventChannel, AgentError> {
        let url = format!("{}/stream", self.iterate_url(session, agent));
        let mut source = self
            .client
            .post(&url)
            .eventsource()
            .map_err(|err| AgentError::Transport(err.to_string()))?;
        source.set_retry_policy(Box::new(retry::Never));

        // Wait for the response head so HTTP errors surface as open failures
        match source.next().await {
            Some(Ok(Event::Open)) => {
                tracing::debug!(session = %session, agent = %agent, "Stream opened");
                Ok(into_channel(source))
            }
            Some(Ok(Event::Message(message))) => {
                let first = stream::once(async move { Ok::<_, AgentError>(message.data) });
                Ok(first.chain(into_channel(source)).boxed())
            }
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(_, response))) => {
                source.close();
                Err(error_from_response(response).await)
            }
            Some(Err(err)) => {
                source.close();
                Err(AgentError::Transport(err.to_string()))
            }
            None => Err(AgentError::Transport("stream closed before opening".into())),
        }
    }

    async fn iterate(
        &self,
        session: SessionId,
        agent: AgentKind,
    ) -> Result<CompletePayload, AgentError> {
        let url = self.iterate_url(session, agent);
        self.send_json(self.client.post(&url)).await
    }

    async fn create_session(&self, task_id: &str) -> Result<BattleSession, AgentError> {
        let url = format!("{}/battles", self.base_url);
        self.send_json(
            self.client
                .post(&url)
                .json(&CreateBattleRequest { task_id }),
        )
        .await
    }

    async fn start_session(&self, session: SessionId) -> Result<(), AgentError> {
        let url = self.battle_url(session, "/start");
        self.send(self.client.post(&url)).await?;
        Ok(())
    }

    async fn reset_session(&self, session: SessionId) -> Result<(), AgentError> {
        let url = self.battle_url(session, "/reset");
        self.send(self.client.post(&url)).await?;
        Ok(())
    }
}
