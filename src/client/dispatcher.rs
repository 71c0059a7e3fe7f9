use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::backoff_delay;
use super::classify::{error_for_status, is_success, should_retry};
use super::request::{RequestDescriptor, ResponseMode, prepare};
use super::stream::StreamSession;
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// HTTP client for the RAG service with retry logic and SSE streaming.
///
/// Features:
/// - Bearer authentication from the shared [`ClientConfig`]
/// - Per-attempt timeouts and capped exponential backoff on 429, 5xx and
///   network failures
/// - Immediate, typed failure on 401/403/404/422
/// - Streaming sessions that never retry once data has been delivered
///
/// Cloning is cheap; clones share the config and the connection pool.
pub struct RagClient<T: Transport = HttpTransport> {
    config: Arc<ClientConfig>,
    transport: Arc<T>,
}

impl<T: Transport> Clone for RagClient<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl RagClient<HttpTransport> {
    /// Create a new client over the default hyper transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }
}

impl<T: Transport> RagClient<T> {
    pub fn with_transport(config: ClientConfig, transport: Arc<T>) -> Self {
        Self {
            config: Arc::new(config.normalized()),
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Execute a request and parse its JSON response.
    pub async fn send<R: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<R> {
        self.send_with_cancel(descriptor, &CancellationToken::new())
            .await
    }

    pub async fn send_with_cancel<R: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<R> {
        let request = prepare(&self.config, descriptor, ResponseMode::Json)?;
        let transport = self.transport.as_ref();

        let body = self
            .with_retry(&request, cancel, |req| fetch_body(transport, req))
            .await?;

        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(|e| {
            warn!(url = %request.url, error = %e, "Response body did not match the expected shape");
            Error::server(None, format!("invalid response JSON: {e}"))
        })
    }

    /// Execute a multipart upload and parse its JSON response.
    ///
    /// The descriptor must carry a [`Form`](super::multipart::Form) body; the
    /// multipart `Content-Type` (with its boundary) is derived from it.
    pub async fn send_multipart<R: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<R> {
        if !descriptor.is_multipart() {
            return Err(Error::invalid_request(
                "send_multipart requires a multipart form body",
            ));
        }
        self.send(descriptor).await
    }

    /// Run the retry loop until a 2xx response arrives and hand back the live
    /// response without reading its body.
    pub async fn open_stream(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let request = prepare(&self.config, descriptor, ResponseMode::EventStream)?;
        let transport = self.transport.as_ref();

        self.with_retry(&request, cancel, |req| open_response(transport, req))
            .await
    }

    /// Open a streaming chat session.
    pub async fn stream(&self, descriptor: &RequestDescriptor) -> Result<StreamSession> {
        self.stream_with_cancel(descriptor, CancellationToken::new())
            .await
    }

    /// Open a streaming chat session bound to `cancel`.
    ///
    /// Cancelling before the response arrives fails the call; cancelling
    /// afterwards ends the session with an `error` event.
    pub async fn stream_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<StreamSession> {
        let response = self.open_stream(descriptor, &cancel).await?;
        debug!(path = %descriptor.path(), "Stream connected");
        Ok(StreamSession::new(response, cancel, self.config.timeout()))
    }

    async fn with_retry<O, F, Fut>(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<O>
    where
        F: FnMut(HttpRequest) -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let max_attempts = self.config.max_retries.max(1);
        let timeout = self.config.timeout();
        let mut attempt = 1u32;

        loop {
            debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt,
                max_retries = max_attempts,
                "Sending request"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled()),
                result = tokio::time::timeout(timeout, attempt_fn(request.clone())) => {
                    result.unwrap_or_else(|_| Err(Error::timeout(timeout)))
                }
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !should_retry(err.status(), Some(&err)) {
                warn!(
                    url = %request.url,
                    status = ?err.status(),
                    error = %err,
                    "Request failed with non-retryable error"
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(
                    url = %request.url,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(Error::retries_exhausted(attempt, &err));
            }

            let wait = backoff_delay(attempt);
            info!(
                url = %request.url,
                retry = attempt,
                max_retries = max_attempts,
                wait_ms = wait.as_millis() as u64,
                status = ?err.status(),
                error = %err,
                "Retryable failure, waiting before retry"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::cancelled()),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}

async fn fetch_body<T: Transport>(transport: &T, request: HttpRequest) -> Result<bytes::Bytes> {
    let response = open_response(transport, request).await?;
    Ok(response.bytes().await?)
}

async fn open_response<T: Transport>(transport: &T, request: HttpRequest) -> Result<HttpResponse> {
    let response = transport.execute(request).await?;
    if is_success(response.status) {
        return Ok(response);
    }

    let status = response.status;
    // The message is best effort; a failed body read still yields a typed error.
    let body = response.bytes().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::multipart::Form;
    use crate::client::transport::TransportError;
    use crate::client::transport::mock::{MockTransport, Reply};
    use crate::error::ErrorKind;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::Instant;

    fn client(replies: Vec<Reply>) -> (RagClient<MockTransport>, Arc<MockTransport>) {
        client_with(ClientConfig::new("sk-test", "https://rag.example.com/"), replies)
    }

    fn client_with(
        config: ClientConfig,
        replies: Vec<Reply>,
    ) -> (RagClient<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(replies));
        (RagClient::with_transport(config, transport.clone()), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_single_call() {
        let (client, transport) = client(vec![Reply::json(200, r#"{"ok":true}"#)]);

        let result: Value = client
            .send(&RequestDescriptor::get("/api/v1/collections").query("limit", 5))
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(transport.calls(), 1);
        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://rag.example.com/api/v1/collections?limit=5"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_statuses_are_not_retried() {
        let cases = [
            (401, ErrorKind::Unauthenticated),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (422, ErrorKind::InvalidRequest),
        ];

        for (status, kind) in cases {
            let (client, transport) =
                client(vec![Reply::json(status, r#"{"detail":"nope"}"#), Reply::json(200, "{}")]);

            let err = client
                .send::<Value>(&RequestDescriptor::get("/api/v1/documents/d1"))
                .await
                .unwrap_err();

            assert_eq!(err.kind(), kind, "status {status}");
            assert_eq!(err.status(), Some(status));
            assert_eq!(err.message(), "nope");
            assert_eq!(transport.calls(), 1, "status {status} must not retry");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_client_errors_fail_fast_as_server_error() {
        let (client, transport) = client(vec![Reply::json(400, "bad"), Reply::json(200, "{}")]);

        let err = client
            .send::<Value>(&RequestDescriptor::get("/api/v1/documents"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.message(), "Bad Request");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let (client, transport) = client(vec![
            Reply::json(429, r#"{"detail":"slow down"}"#),
            Reply::json(200, r#"{"ok":true}"#),
        ]);

        let start = Instant::now();
        let result: Value = client
            .send(&RequestDescriptor::post("/api/v1/retrievals"))
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        assert_eq!(transport.calls(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_is_capped() {
        let config = ClientConfig::new("sk-test", "https://rag.example.com").with_max_retries(6);
        let (client, transport) = client_with(
            config,
            vec![
                Reply::json(500, "{}"),
                Reply::json(502, "{}"),
                Reply::json(503, "{}"),
                Reply::json(504, "{}"),
                Reply::json(500, "{}"),
                Reply::json(200, r#"{"ok":true}"#),
            ],
        );

        let start = Instant::now();
        let _: Value = client
            .send(&RequestDescriptor::get("/api/v1/health"))
            .await
            .unwrap();

        // 2s + 4s + 8s + 16s + 16s
        assert_eq!(transport.calls(), 6);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(46), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(47), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_wrap_last_failure() {
        let (client, transport) = client(vec![
            Reply::json(503, r#"{"detail":"warming up"}"#),
            Reply::json(503, r#"{"detail":"warming up"}"#),
            Reply::json(500, r#"{"detail":"index unavailable"}"#),
            Reply::json(200, "{}"),
        ]);

        let err = client
            .send::<Value>(&RequestDescriptor::get("/api/v1/collections"))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.status(), Some(500));
        assert!(err.message().contains("after 3 attempts"));
        assert!(err.message().contains("index unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_fault_is_retried() {
        let (client, transport) = client(vec![
            Reply::Fault(TransportError::Connect("connection refused".to_string())),
            Reply::json(200, r#"[1,2,3]"#),
        ]);

        let result: Vec<u32> = client
            .send(&RequestDescriptor::get("/api/v1/ids"))
            .await
            .unwrap();

        assert_eq!(result, vec![1, 2, 3]);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_wrapped() {
        let config = ClientConfig::new("sk-test", "https://rag.example.com")
            .with_timeout_ms(500)
            .with_max_retries(2);
        let (client, transport) = client_with(config, vec![Reply::Hang, Reply::Hang]);

        let start = Instant::now();
        let err = client
            .send::<Value>(&RequestDescriptor::get("/api/v1/slow"))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 2);
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.message().contains("timed out"));
        // 500ms + 2s backoff + 500ms
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let (client, transport) = client(vec![Reply::json(503, "{}"), Reply::json(200, "{}")]);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let err = client
            .send_with_cancel::<Value>(&RequestDescriptor::get("/api/v1/collections"), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.message().contains("cancelled"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_json_body_is_not_retried() {
        let (client, transport) = client(vec![
            Reply::json(200, "<html>proxy error</html>"),
            Reply::json(200, "{}"),
        ]);

        let err = client
            .send::<Value>(&RequestDescriptor::get("/api/v1/collections"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.message().starts_with("invalid response JSON"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_body_parses_as_null() {
        let (client, _) = client(vec![Reply::json(204, "")]);

        let result: Option<Value> = client
            .send(&RequestDescriptor::delete("/api/v1/documents/d1"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_multipart() {
        let (client, transport) = client(vec![Reply::json(200, r#"{"document_id":"d1"}"#)]);
        let form = Form::upload("notes.txt", &b"hello"[..], "col-1", None);

        let result: Value = client
            .send_multipart(&RequestDescriptor::post("/api/v1/documents").multipart(form))
            .await
            .unwrap();

        assert_eq!(result["document_id"], "d1");
        let request = &transport.requests()[0];
        let content_type = request
            .headers
            .iter()
            .find(|(name, _)| name == "Content-Type")
            .map(|(_, value)| value.to_string())
            .unwrap();
        let boundary = multer::parse_boundary(&content_type).unwrap();
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains(&format!("--{boundary}\r\n")));
        assert!(body.contains("name=\"collection_id\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_multipart_requires_form() {
        let (client, transport) = client(vec![]);
        let err = client
            .send_multipart::<Value>(&RequestDescriptor::post("/api/v1/documents"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_request_on_every_attempt() {
        let (client, transport) = client(vec![
            Reply::json(502, "{}"),
            Reply::json(200, "{}"),
        ]);
        let descriptor = RequestDescriptor::post("/api/v1/chat")
            .json(&json!({"query": "hello"}))
            .unwrap();

        let _: Value = client.send(&descriptor).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, requests[1].url);
        assert_eq!(requests[0].body, requests[1].body);
        assert_eq!(requests[0].headers, requests[1].headers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_config() {
        let (client, transport) = client(vec![
            Reply::json(200, r#"{"n":1}"#),
            Reply::json(200, r#"{"n":2}"#),
        ]);
        let other = client.clone();
        let first = RequestDescriptor::get("/a");
        let second = RequestDescriptor::get("/b");

        let (a, b) = tokio::join!(
            client.send::<Value>(&first),
            other.send::<Value>(&second),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.calls(), 2);
        assert!(std::ptr::eq(client.config(), other.config()));
    }
}
