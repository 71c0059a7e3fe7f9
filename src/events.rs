use serde::{Deserialize, Serialize};

/// One decoded chat event from the SSE stream, keyed by its `type` field.
///
/// Exactly one `done` event ends a successful session; an `error` event ends a
/// session that failed after streaming began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta {
        #[serde(alias = "text")]
        delta: String,
    },
    Sources {
        #[serde(default)]
        sources: Vec<SourceRef>,
    },
    Media {
        #[serde(default)]
        media: Vec<MediaRef>,
    },
    FollowUp {
        #[serde(default, alias = "follow_up")]
        questions: Vec<String>,
    },
    Usage {
        #[serde(default)]
        usage: TokenUsage,
    },
    ReasoningStep {
        #[serde(default)]
        step: u32,
        #[serde(default)]
        description: String,
    },
    SubQuery {
        #[serde(alias = "sub_query")]
        query: String,
    },
    Done {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Error {
        #[serde(alias = "error")]
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Fields the service sends that are not modelled above
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// The wire discriminant of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Delta { .. } => "delta",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Media { .. } => "media",
            StreamEvent::FollowUp { .. } => "follow_up",
            StreamEvent::Usage { .. } => "usage",
            StreamEvent::ReasoningStep { .. } => "reasoning_step",
            StreamEvent::SubQuery { .. } => "sub_query",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }

    pub fn delta_text(&self) -> Option<&str> {
        match self {
            StreamEvent::Delta { delta } => Some(delta),
            _ => None,
        }
    }
}
