use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::error::Error;

/// Response body as a stream of raw chunks, in arrival order.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    Request(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("body read failed: {0}")]
    Body(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::network(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    pub body: Bytes,
}

pub struct HttpResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Read the whole body into memory.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        if chunks.len() == 1 {
            return Ok(chunks.into_iter().next().unwrap_or_default());
        }
        Ok(Bytes::from(chunks.concat()))
    }
}

/// The network seam under the dispatcher: send one request, get status and body.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

/// Production transport on hyper with rustls (HTTP/1.1 and HTTP/2).
pub struct HttpTransport {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        // Already installed is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = Request::builder().method(request.method).uri(request.url.as_str());

        for (name, value) in &request.headers {
            req = req.header(name.as_ref(), value.as_ref());
        }

        let req = req
            .body(Full::new(request.body))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .into_data_stream()
            .map_err(|e| TransportError::Body(e.to_string()));

        Ok(HttpResponse {
            status,
            body: Box::pin(body),
        })
    }
}
