use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthExpired,
    QuotaExceeded,
    RateLimited,
    UpstreamUnavailable,
    UpstreamHttp,
    EmptyStream,
    EmptyResponse,
    MalformedFrame,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::UpstreamHttp => "upstream_http",
            ErrorKind::EmptyStream => "empty_stream",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::MalformedFrame => "malformed_frame",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failures surfaced to callers; never raw strings, so the UI can
/// render a stable per-kind message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("credential expired or invalid")]
    AuthExpired,
    #[error("quota exceeded: {current}/{limit} ({tier})")]
    QuotaExceeded { limit: u32, current: u32, tier: String },
    #[error("{0}")]
    RateLimited(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream returned status {status}")]
    UpstreamHttp { status: u16 },
    #[error("stream ended without any data frames")]
    EmptyStream,
    #[error("response contained no text")]
    EmptyResponse,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::AuthExpired => ErrorKind::AuthExpired,
            GatewayError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            GatewayError::RateLimited(_) => ErrorKind::RateLimited,
            GatewayError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            GatewayError::UpstreamHttp { .. } => ErrorKind::UpstreamHttp,
            GatewayError::EmptyStream => ErrorKind::EmptyStream,
            GatewayError::EmptyResponse => ErrorKind::EmptyResponse,
            GatewayError::MalformedFrame(_) => ErrorKind::MalformedFrame,
            GatewayError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AuthExpired).unwrap(),
            "\"auth_expired\""
        );
        assert_eq!(ErrorKind::UpstreamHttp.to_string(), "upstream_http");
    }

    #[test]
    fn quota_error_carries_payload() {
        let err = GatewayError::QuotaExceeded { limit: 10, current: 10, tier: "free".into() };
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(err.to_string(), "quota exceeded: 10/10 (free)");
    }

    #[test]
    fn error_event_carries_kind_and_message() {
        let event = GatewayError::EmptyStream.to_event();
        assert_eq!(
            event,
            StreamEvent::error(ErrorKind::EmptyStream, "stream ended without any data frames")
        );
    }
}
