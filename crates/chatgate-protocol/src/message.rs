use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Immutable once persisted; content is sanitized on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    pub fn new(role: Role, content: &str, model: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: sanitize_text(content),
            model,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content, None)
    }

    pub fn assistant(content: &str, model: &str) -> Self {
        Self::new(Role::Assistant, content, Some(model.to_string()))
    }
}

/// Strips control characters (keeping newlines and tabs), byte-order marks
/// and zero-width spaces. Applied before storage and before transmission.
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(c, '\u{feff}' | '\u{200b}') && (!c.is_control() || matches!(c, '\n' | '\t'))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_bom_and_control_chars() {
        assert_eq!(sanitize_text("\u{feff}hello\u{0000} world\u{7f}"), "hello world");
        assert_eq!(sanitize_text("a\u{200b}b"), "ab");
    }

    #[test]
    fn sanitize_keeps_newlines_and_tabs() {
        assert_eq!(sanitize_text("line one\nline\ttwo"), "line one\nline\ttwo");
    }

    #[test]
    fn message_content_is_sanitized_on_construction() {
        let message = Message::user("\u{feff}hi\u{0008}");
        assert_eq!(message.content, "hi");
        assert_eq!(message.role, Role::User);
        assert!(message.model.is_none());
    }
}
