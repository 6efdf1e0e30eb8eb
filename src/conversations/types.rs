//! Conversation and message types.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique conversation identifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

/// Unique message identifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

impl_id!(ConversationId);
impl_id!(MessageId);

/// Author of a message inside a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The end user.
    User,
    /// The assistant persona.
    Assistant,
}

/// One turn in a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    #[serde(default)]
    pub id: MessageId,
    /// Message author.
    pub role: MessageRole,
    /// Message text, non-empty after trimming.
    pub content: String,
    /// Creation time; insertion order matches chronological order.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A named, ordered sequence of messages with metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique, immutable identifier.
    pub id: ConversationId,
    /// Display title; auto-derived from the first user message while it is
    /// still [`Conversation::DEFAULT_TITLE`].
    #[serde(default = "default_title")]
    pub title: String,
    /// Snippet of the last message.
    #[serde(default = "default_preview")]
    pub preview: String,
    /// Ordered message sequence.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp, never earlier than `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Pinned conversations sort before unpinned ones.
    #[serde(default)]
    pub pinned: bool,
    /// Cached `messages.len()`.
    #[serde(default)]
    pub message_count: u32,
    /// Cached total word count across all messages.
    #[serde(default)]
    pub word_count: u32,
}

fn default_title() -> String {
    Conversation::DEFAULT_TITLE.to_string()
}

fn default_preview() -> String {
    Conversation::DEFAULT_PREVIEW.to_string()
}

impl Conversation {
    /// Title given to conversations that were never renamed.
    pub const DEFAULT_TITLE: &'static str = "New Conversation";
    /// Preview shown before any message lands.
    pub const DEFAULT_PREVIEW: &'static str = "A new flame ignites...";

    /// Create an empty conversation with default title and preview.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            title: default_title(),
            preview: default_preview(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            pinned: false,
            message_count: 0,
            word_count: 0,
        }
    }

    /// Append a message, keeping the cached counts in sync.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.recount();
    }

    /// Recompute `message_count` and `word_count` from `messages`.
    pub fn recount(&mut self) {
        self.message_count = u32::try_from(self.messages.len()).unwrap_or(u32::MAX);
        self.word_count = self
            .messages
            .iter()
            .map(|m| count_words(&m.content))
            .sum();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Count whitespace-separated words.
#[must_use]
pub fn count_words(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

/// Truncate to at most `max_chars` characters, ellipsis included.
///
/// Counts characters rather than bytes so multi-byte text never gets cut
/// mid code point.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";

    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(SUFFIX.len());
    let truncated: String = text.chars().take(keep).collect();
    format!("{truncated}{SUFFIX}")
}
