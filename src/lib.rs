//! Resilient request and streaming core for RAG service clients.
//!
//! [`RagClient`] sends JSON and multipart requests with per-attempt timeouts
//! and capped exponential backoff, and opens [`StreamSession`]s that decode
//! the service's `data: <json>` event stream into typed [`StreamEvent`]s.
//!
//! ```no_run
//! use ragstream::{ClientConfig, RagClient, RequestDescriptor, StreamEvent};
//!
//! # async fn run() -> ragstream::Result<()> {
//! let client = RagClient::new(ClientConfig::new("sk-...", "https://rag.example.com"));
//! let request = RequestDescriptor::post("/api/v1/chat/stream")
//!     .json(&serde_json::json!({ "query": "What is in my notes?" }))?;
//!
//! let mut session = client.stream(&request).await?;
//! while let Some(event) = session.next().await {
//!     if let StreamEvent::Delta { delta } = event {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use client::{
    Form, Part, RagClient, RequestBody, RequestDescriptor, ResponseMode, SessionState,
    StreamSession,
};
pub use config::{ClientConfig, Config};
pub use error::{Error, ErrorKind, Result};
pub use events::StreamEvent;
