mod backoff;
mod classify;
mod dispatcher;
mod multipart;
mod request;
mod sse;
mod stream;
mod transport;

pub use backoff::{BASE_DELAY_MS, MAX_DELAY_MS, backoff_delay};
pub use classify::{
    classify_status, error_for_status, extract_error_message, is_retryable_status, is_success,
    is_terminal_status, should_retry,
};
pub use dispatcher::RagClient;
pub use multipart::{Form, Part};
pub use request::{RequestBody, RequestDescriptor, ResponseMode, build_url};
pub use sse::SseDecoder;
pub use stream::{SessionState, StreamSession};
pub use transport::{BodyStream, HttpRequest, HttpResponse, HttpTransport, Transport, TransportError};
