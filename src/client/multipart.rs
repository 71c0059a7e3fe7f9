use bytes::{Bytes, BytesMut};
use common_multipart_rfc7578::client::multipart;
use futures::TryStreamExt;
use std::io::Cursor;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Content {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        data: Bytes,
    },
}

/// One field of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    content: Content,
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: Content::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: Content::File {
                file_name: file_name.into(),
                content_type: mime::APPLICATION_OCTET_STREAM.to_string(),
                data: data.into(),
            },
        }
    }

    /// Set the content type of a file part. Text parts have none.
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        if let Content::File { content_type, .. } = &mut self.content {
            *content_type = mime.into();
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text_value(&self) -> Option<&str> {
        match &self.content {
            Content::Text(value) => Some(value),
            Content::File { .. } => None,
        }
    }
}

/// An ordered list of form fields. Cheap to clone; encoded once per request.
#[derive(Debug, Clone, Default)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    /// The document upload form: `file`, `collection_id` and JSON `metadata`.
    pub fn upload(
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
        collection_id: impl Into<String>,
        metadata: Option<&serde_json::Value>,
    ) -> Self {
        let metadata = metadata
            .map(serde_json::Value::to_string)
            .unwrap_or_else(|| "{}".to_string());

        Self::new()
            .part(Part::file("file", file_name, data))
            .text("collection_id", collection_id)
            .text("metadata", metadata)
    }

    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(Part::text(name, value))
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Encode to the wire body and its `Content-Type` (which carries a fresh boundary).
    pub fn encode(&self) -> Result<(String, Bytes)> {
        let mut form = multipart::Form::default();
        for part in &self.parts {
            match &part.content {
                Content::Text(value) => form.add_text(&part.name, value.clone()),
                Content::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let file_mime = content_type
                        .parse::<mime::Mime>()
                        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
                    form.add_reader_file_with_mime(
                        &part.name,
                        Cursor::new(data.clone()),
                        file_name.clone(),
                        file_mime,
                    );
                }
            }
        }

        let content_type = form.content_type();
        let body = multipart::Body::from(form);
        // Every part is an in-memory cursor, so the body stream never pends.
        let encoded = futures::executor::block_on(body.try_fold(
            BytesMut::new(),
            |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            },
        ))
        .map_err(|e| Error::invalid_request(format!("multipart encoding failed: {e}")))?;

        Ok((content_type, encoded.freeze()))
    }
}
