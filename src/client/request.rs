use bytes::Bytes;
use hyper::Method;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::multipart::Form;
use super::transport::HttpRequest;
use crate::config::ClientConfig;
use crate::error::{Error, Result};

static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "ragstream/{} {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Form),
}

/// What the response body will be used for; selects the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Json,
    EventStream,
}

/// Everything needed to issue one logical request.
///
/// Built once by the caller and only read afterwards; every attempt of the
/// retry loop sends the same method, URL, headers and body.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: BTreeMap<String, String>,
    body: RequestBody,
    headers: Vec<(String, String)>,
    skip_auth: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: RequestBody::Empty,
            headers: Vec::new(),
            skip_auth: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(key.into(), value.to_string());
        self
    }

    pub fn json_value(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::invalid_request(format!("unserializable request body: {e}")))?;
        Ok(self.json_value(value))
    }

    pub fn multipart(mut self, form: Form) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send without the `Authorization` header (e.g. registration).
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

pub fn build_url(base_url: &str, path: &str, query: &BTreeMap<String, String>) -> String {
    let mut url = String::with_capacity(base_url.len() + path.len() + 32);
    url.push_str(base_url.trim_end_matches('/'));
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);

    for (i, (key, value)) in query.iter().enumerate() {
        url.push(if i == 0 && !path.contains('?') { '?' } else { '&' });
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

pub fn build_headers(
    config: &ClientConfig,
    descriptor: &RequestDescriptor,
    content_type: Option<String>,
    mode: ResponseMode,
) -> Vec<(Cow<'static, str>, Cow<'static, str>)> {
    let mut headers: Vec<(Cow<'static, str>, Cow<'static, str>)> =
        Vec::with_capacity(4 + descriptor.headers.len());

    if !descriptor.skip_auth
        && let Some(api_key) = &config.api_key
    {
        headers.push((
            Cow::Borrowed("Authorization"),
            Cow::Owned(format!("Bearer {}", api_key)),
        ));
    }
    if let Some(content_type) = content_type {
        headers.push((Cow::Borrowed("Content-Type"), Cow::Owned(content_type)));
    }
    headers.push((
        Cow::Borrowed("Accept"),
        Cow::Borrowed(match mode {
            ResponseMode::Json => "application/json",
            ResponseMode::EventStream => "text/event-stream",
        }),
    ));
    headers.push((Cow::Borrowed("User-Agent"), Cow::Owned(USER_AGENT.clone())));

    for (name, value) in &descriptor.headers {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((Cow::Owned(name.clone()), Cow::Owned(value.clone())));
    }

    headers
}

/// Turn a descriptor into the wire request reused by every attempt.
pub fn prepare(
    config: &ClientConfig,
    descriptor: &RequestDescriptor,
    mode: ResponseMode,
) -> Result<HttpRequest> {
    let (content_type, body) = match &descriptor.body {
        RequestBody::Empty => (None, Bytes::new()),
        RequestBody::Json(value) => {
            let bytes = serde_json::to_vec(value)
                .map_err(|e| Error::invalid_request(format!("unserializable request body: {e}")))?;
            (Some("application/json".to_string()), Bytes::from(bytes))
        }
        RequestBody::Multipart(form) => {
            let (content_type, body) = form.encode()?;
            (Some(content_type), body)
        }
    };

    Ok(HttpRequest {
        method: descriptor.method.clone(),
        url: build_url(&config.base_url, &descriptor.path, &descriptor.query),
        headers: build_headers(config, descriptor, content_type, mode),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    fn config() -> ClientConfig {
        ClientConfig::new("sk-test", "https://rag.example.com/")
    }

    #[test]
    fn test_build_url_with_query() {
        let query = BTreeMap::from([
            ("limit".to_string(), "10".to_string()),
            ("collection".to_string(), "my docs".to_string()),
        ]);
        assert_eq!(
            build_url("https://rag.example.com", "/api/v1/documents", &query),
            "https://rag.example.com/api/v1/documents?collection=my%20docs&limit=10"
        );
    }

    #[test]
    fn test_build_url_adds_leading_slash() {
        assert_eq!(
            build_url("http://localhost:8000/", "health", &BTreeMap::new()),
            "http://localhost:8000/health"
        );
    }

    #[test]
    fn test_json_request_headers() {
        let descriptor = RequestDescriptor::post("/api/v1/chat")
            .json(&serde_json::json!({"query": "hi"}))
            .unwrap();
        let request = prepare(&config(), &descriptor, ResponseMode::Json).unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://rag.example.com/api/v1/chat");
        assert_eq!(header(&request, "Authorization"), Some("Bearer sk-test"));
        assert_eq!(header(&request, "Content-Type"), Some("application/json"));
        assert_eq!(header(&request, "Accept"), Some("application/json"));
        assert_eq!(request.body.as_ref(), br#"{"query":"hi"}"#);
    }

    #[test]
    fn test_skip_auth() {
        let descriptor = RequestDescriptor::post("/auth/register").skip_auth();
        let request = prepare(&config(), &descriptor, ResponseMode::Json).unwrap();
        assert!(header(&request, "Authorization").is_none());
    }

    #[test]
    fn test_no_api_key_no_auth_header() {
        let descriptor = RequestDescriptor::get("/health");
        let request = prepare(&ClientConfig::default(), &descriptor, ResponseMode::Json).unwrap();
        assert!(header(&request, "Authorization").is_none());
        assert!(header(&request, "Content-Type").is_none());
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_multipart_content_type_matches_body() {
        let form = Form::upload("a.txt", &b"hello"[..], "col-1", None);
        let descriptor = RequestDescriptor::post("/api/v1/documents").multipart(form);
        let request = prepare(&config(), &descriptor, ResponseMode::Json).unwrap();

        let content_type = header(&request, "Content-Type").unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let boundary = multer::parse_boundary(content_type).unwrap();
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains(&format!("--{boundary}\r\n")));
        assert!(body.contains("hello"));
    }

    #[test]
    fn test_event_stream_accept() {
        let descriptor = RequestDescriptor::post("/api/v1/chat/stream");
        let request = prepare(&config(), &descriptor, ResponseMode::EventStream).unwrap();
        assert_eq!(header(&request, "Accept"), Some("text/event-stream"));
    }

    #[test]
    fn test_extra_headers_override_defaults() {
        let descriptor = RequestDescriptor::get("/health")
            .header("accept", "text/plain")
            .header("X-Request-Id", "abc");
        let request = prepare(&config(), &descriptor, ResponseMode::Json).unwrap();

        let accepts: Vec<_> = request
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("accept"))
            .collect();
        assert_eq!(accepts.len(), 1);
        assert_eq!(header(&request, "Accept"), Some("text/plain"));
        assert_eq!(header(&request, "X-Request-Id"), Some("abc"));
    }
}
