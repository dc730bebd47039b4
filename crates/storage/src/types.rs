use super::ids::{ChatId, MessageId, UserId};

/// Fallback chat title when derivation yields nothing usable.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Storage-local speaker role, intentionally decoupled from caller-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Language tag persisted with each message.
///
/// Assigned once at creation from detection or negotiation and never
/// recomputed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Ta,
    En,
}

impl Language {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ta => "ta",
            Self::En => "en",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        match raw {
            "ta" => Some(Self::Ta),
            "en" => Some(Self::En),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: ChatId,
    pub owner_id: UserId,
    pub title: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub owner_id: UserId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: MessageRole,
    pub content: String,
    pub language: Language,
    pub is_pinned: bool,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub language: Language,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, language: Language) -> Self {
        Self {
            role,
            content: content.into(),
            language,
        }
    }
}
