use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

/// One frame of the client-visible event protocol. Produced only by the
/// relay; forwarded verbatim by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk {
        content: String,
    },
    Complete {
        content: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk { content: content.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        StreamEvent::Error { kind, message: message.into() }
    }

    /// Newline-delimited JSON encoding used on the wire.
    pub fn to_frame(&self) -> String {
        let mut frame = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","kind":"upstream_unavailable","message":"encode failed"}"#
                .to_string()
        });
        frame.push('\n');
        frame
    }
}
