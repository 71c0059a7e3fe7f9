use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::transport::{BodyStream, HttpResponse};
use crate::error::Error;
use crate::events::StreamEvent;

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request and retries in flight. Never returned by [`StreamSession::state`]:
    /// this phase runs inside [`RagClient::stream`](super::RagClient::stream), and a
    /// session only exists once the service answered with 2xx. Failures here are
    /// returned as `Err` from that call.
    Connecting,
    Streaming,
    /// A `done` event was delivered.
    Done,
    /// A transport fault, idle timeout or cancellation ended the stream; an
    /// `error` event was delivered.
    Failed,
    /// Input ran out without a `done` event.
    Ended,
}

/// An ordered, pull-based sequence of chat events from one streaming response.
///
/// Never retries: faults after the response arrived are delivered in-band as
/// a final `error` event, so events already yielded stay valid.
pub struct StreamSession {
    body: Option<BodyStream>,
    decoder: SseDecoder,
    ready: VecDeque<StreamEvent>,
    state: SessionState,
    cancel: CancellationToken,
    idle_timeout: Duration,
    session_id: Option<String>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &self.state)
            .field("queued", &self.ready.len())
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    pub(crate) fn new(response: HttpResponse, cancel: CancellationToken, idle_timeout: Duration) -> Self {
        Self {
            body: Some(response.body),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            state: SessionState::Streaming,
            cancel,
            idle_timeout,
            session_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id from the `done` event, once it has been delivered.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Abort the stream; the next call to [`next`](Self::next) yields an `error` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event in arrival order, or `None` once the session has ended.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                if let StreamEvent::Done { session_id, .. } = &event {
                    self.session_id = session_id.clone();
                    self.close(SessionState::Done);
                    debug!(session_id = ?self.session_id, "Stream done");
                }
                return Some(event);
            }

            if self.state != SessionState::Streaming {
                return None;
            }
            let body = self.body.as_mut()?;

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::network("stream cancelled")),
                chunk = tokio::time::timeout(self.idle_timeout, body.next()) => match chunk {
                    Ok(Some(Ok(bytes))) => Ok(Some(bytes)),
                    Ok(Some(Err(e))) => Err(Error::from(e)),
                    Ok(None) => Ok(None),
                    Err(_) => Err(Error::timeout(self.idle_timeout)),
                },
            };

            match read {
                Ok(Some(bytes)) => self.ready.extend(self.decoder.feed(&bytes)),
                Ok(None) => {
                    self.decoder.finish();
                    self.close(SessionState::Ended);
                    debug!("Stream ended without a done event");
                    return None;
                }
                Err(err) => {
                    warn!(error = %err, "Stream interrupted");
                    self.close(SessionState::Failed);
                    return Some(StreamEvent::error(format!(
                        "stream interrupted: {}",
                        err.message()
                    )));
                }
            }
        }
    }

    /// Drain the session, concatenating `delta` text.
    ///
    /// Returns the text and the terminal event (`done` or `error`), if any.
    pub async fn collect_text(mut self) -> (String, Option<StreamEvent>) {
        let mut text = String::new();
        let mut terminal = None;
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Delta { delta } => text.push_str(&delta),
                StreamEvent::Done { .. } | StreamEvent::Error { .. } => terminal = Some(event),
                StreamEvent::Sources { .. }
                | StreamEvent::Media { .. }
                | StreamEvent::FollowUp { .. }
                | StreamEvent::Usage { .. }
                | StreamEvent::ReasoningStep { .. }
                | StreamEvent::SubQuery { .. } => {}
            }
        }
        (text, terminal)
    }

    /// Adapt the session into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session.next().await.map(|event| (event, session))
        })
    }

    fn close(&mut self, state: SessionState) {
        self.state = state;
        self.body = None;
        self.ready.clear();
        self.decoder = SseDecoder::default();
    }
}
