//! Observation capability handed to the session controller.

use crate::conversations::{ConversationId, Message};

use super::controller::SessionState;

/// Severity of a transient notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// Neutral feedback, e.g. "Conversation deleted".
    Info,
    /// A completed action worth celebrating.
    Success,
    /// A failure the user should read.
    Error,
}

/// What the controller reports as it works. All methods default to no-ops
/// so an implementor only picks up what it renders.
pub trait SessionEvents: Send + Sync {
    /// A transient banner-style notice.
    fn notice(&self, _kind: NoticeKind, _text: &str) {}

    /// The session state machine moved.
    fn state_changed(&self, _state: SessionState) {}

    /// The conversation list changed shape (create, delete, pin, evict).
    fn conversation_list_changed(&self) {}

    /// A message landed in a conversation's transcript.
    fn message_appended(&self, _conversation: ConversationId, _message: &Message) {}
}

/// Discards every event. Useful headless and in tests.
pub struct NullEvents;

impl SessionEvents for NullEvents {}
