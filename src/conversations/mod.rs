//! Conversation domain: types plus the durable repository.

pub mod repository;
pub mod types;

pub use repository::{
    ConversationRepository, RepositoryError, RepositoryResult, RepositoryStats,
    MAX_CONVERSATIONS,
};
pub use types::{
    count_words, truncate_chars, Conversation, ConversationId, Message, MessageId,
    MessageRole,
};
