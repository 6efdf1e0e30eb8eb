//! Wire protocol between the chat client and the mediator server.
//!
//! A single POST endpoint carries [`ChatRequest`] and answers with
//! [`ChatReply`] on success or [`ErrorBody`] on failure. Field names follow
//! the JSON schema the web client was built against, hence the camelCase
//! renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role vocabulary allowed on the wire.
///
/// `system` never appears in client-supplied history of a well-behaved
/// client, but the mediator accepts it and folds it into composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    /// A message authored by the end user.
    User,
    /// A message authored by the model.
    Assistant,
    /// An instruction message composed by the mediator.
    System,
}

impl WireRole {
    /// Stable string form used in upstream requests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One `{role, content}` pair of conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message author.
    pub role: WireRole,
    /// Message text.
    pub content: String,
}

impl WireMessage {
    /// Convenience constructor.
    #[must_use]
    pub fn new(role: WireRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Session configuration the client sends along with every message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AseState {
    /// Configured display name of the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Personality tag; unknown tags fall back to the default persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    /// Cosmic-insight augmentation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosmic_insights: Option<bool>,
    /// Mood-reflection augmentation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_analysis: Option<bool>,
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The new user message, 1..=1000 characters after trimming.
    pub message: String,
    /// Trailing window of prior turns, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<WireMessage>,
    /// Session configuration; missing fields use server defaults.
    #[serde(default)]
    pub ase_state: AseState,
}

/// Token accounting reported by the model provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens produced in the reply.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Successful reply from the mediator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatReply {
    /// Trimmed reply text.
    pub response: String,
    /// Usage accounting passed through from the provider.
    pub usage: Usage,
    /// Server-side timestamp of the reply.
    pub timestamp: DateTime<Utc>,
}

/// Error body shared by every failing status code.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable error copy.
    pub error: String,
    /// Milliseconds until the next admission token, on 429 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Body of `GET /api/health`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthBody {
    /// Liveness message.
    pub status: String,
    /// Server-side timestamp.
    pub timestamp: DateTime<Utc>,
    /// Process uptime in seconds.
    pub uptime: f64,
}
