use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::FusedStream;
use futures::{Stream, StreamExt};

use crate::agent::endpoint::RawEventChannel;
use crate::agent::error::AgentError;
use crate::agent::events::StreamEvent;

/// Message surfaced when an incremental payload cannot be decoded
pub const DECODE_FAILURE_MESSAGE: &str = "Failed to parse stream event";

/// Decode one raw incremental message.
///
/// Returns `None` for blank keep-alive payloads. Malformed payloads decode to an
/// `error` event carrying [`DECODE_FAILURE_MESSAGE`].
pub fn decode_message(raw: &str) -> Option<StreamEvent> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    tracing::trace!("Stream raw message: {}", trimmed);

    match serde_json::from_str::<StreamEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to parse stream message: {e}. Message: {trimmed}");
            Some(StreamEvent::Error {
                message: DECODE_FAILURE_MESSAGE.to_string(),
            })
        }
    }
}

/// Lazy, finite, non-restartable sequence of typed events for one attempt.
///
/// Yields events in arrival order and ends after the first terminal event or the
/// first transport error, whichever comes first. Anything the channel delivers
/// after that point is never read.
pub struct EventDecoder {
    source: RawEventChannel,
    finished: bool,
}

impl EventDecoder {
    pub fn new(source: RawEventChannel) -> Self {
        Self {
            source,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for EventDecoder {
    type Item = Result<StreamEvent, AgentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match this.source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(raw))) => {
                    let Some(event) = decode_message(&raw) else {
                        continue;
                    };
                    if event.is_terminal() {
                        this.finished = true;
                    }
                    return Poll::Ready(Some(Ok(event)));
                }
            }
        }
    }
}

impl FusedStream for EventDecoder {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}
