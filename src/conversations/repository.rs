//! Conversation repository: CRUD, search, ordering, eviction.
//!
//! The repository owns the durable conversation list, persisted as one JSON
//! record in the key/value store, the same way the original web client kept
//! it in local storage. It also owns the last-active-conversation pointer.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{keys, KeyValueStore, StorageError};

use super::types::{
    count_words, truncate_chars, Conversation, ConversationId, MessageRole,
};

/// Hard ceiling on stored conversations; oldest by `updated_at` are evicted
/// past it, pinned or not.
pub const MAX_CONVERSATIONS: usize = 50;

/// Characters kept in the preview snippet.
const PREVIEW_CHARS: usize = 50;
/// Characters kept in an auto-derived title.
const TITLE_CHARS: usize = 30;

/// Errors reported across the repository boundary.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The referenced conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// The store rejected the operation even after an eviction retry.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Convenience result alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage counters used for logging and diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Number of stored conversations.
    pub conversation_count: usize,
    /// Total messages across all conversations.
    pub message_count: usize,
}

/// Durable conversation collection.
pub struct ConversationRepository {
    store: Arc<dyn KeyValueStore>,
}

impl ConversationRepository {
    /// Create a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All conversations: pinned first, then `updated_at` descending, ties
    /// kept in stored order.
    pub async fn list(&self) -> RepositoryResult<Vec<Conversation>> {
        let mut conversations = self.load_all().await?;
        sort_for_display(&mut conversations);
        Ok(conversations)
    }

    /// Fetch one conversation by id.
    ///
    /// # Errors
    /// [`RepositoryError::NotFound`] when the id is unknown.
    pub async fn get(&self, id: ConversationId) -> RepositoryResult<Conversation> {
        self.load_all()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(RepositoryError::NotFound(id))
    }

    /// Insert or replace a conversation by id.
    ///
    /// Derived fields (`updated_at`, counts, preview, auto-title) are
    /// recomputed before persisting. New conversations land at the front of
    /// the stored order.
    pub async fn upsert(&self, mut conversation: Conversation) -> RepositoryResult<()> {
        normalize(&mut conversation);

        let mut all = self.load_all().await?;
        if let Some(slot) = all.iter_mut().find(|c| c.id == conversation.id) {
            *slot = conversation;
        } else {
            all.insert(0, conversation);
        }

        if all.len() > MAX_CONVERSATIONS {
            evict_to_ceiling(&mut all);
        }

        self.write_all(all).await
    }

    /// Remove a conversation. Idempotent: absent ids are not an error.
    pub async fn delete(&self, id: ConversationId) -> RepositoryResult<()> {
        let mut all = self.load_all().await?;
        let before = all.len();
        all.retain(|c| c.id != id);
        if all.len() == before {
            return Ok(());
        }
        self.write_all(all).await?;

        if self.last_active().await? == Some(id) {
            self.set_last_active(None).await?;
        }
        Ok(())
    }

    /// Case-insensitive match over title, preview, and message contents,
    /// in `list` order.
    pub async fn search(&self, query: &str) -> RepositoryResult<Vec<Conversation>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Conversation> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.preview.to_lowercase().contains(&needle)
                    || c.messages
                        .iter()
                        .any(|m| m.content.to_lowercase().contains(&needle))
            })
            .collect();
        sort_for_display(&mut hits);
        Ok(hits)
    }

    /// Remove every conversation and the last-active pointer.
    pub async fn clear(&self) -> RepositoryResult<()> {
        self.store.remove(keys::CONVERSATIONS).await?;
        self.store.remove(keys::LAST_CHAT_ID).await?;
        Ok(())
    }

    /// Identifier of the last active conversation, if recorded.
    pub async fn last_active(&self) -> RepositoryResult<Option<ConversationId>> {
        Ok(self
            .store
            .get(keys::LAST_CHAT_ID)
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    /// Record (or clear) the last active conversation.
    pub async fn set_last_active(
        &self,
        id: Option<ConversationId>,
    ) -> RepositoryResult<()> {
        match id {
            Some(id) => self
                .store
                .set(keys::LAST_CHAT_ID, &id.to_string())
                .await
                .map_err(Into::into),
            None => self
                .store
                .remove(keys::LAST_CHAT_ID)
                .await
                .map_err(Into::into),
        }
    }

    /// Storage counters.
    pub async fn stats(&self) -> RepositoryResult<RepositoryStats> {
        let all = self.load_all().await?;
        Ok(RepositoryStats {
            conversation_count: all.len(),
            message_count: all.iter().map(|c| c.messages.len()).sum(),
        })
    }

    /// Load the stored list in stored order. Absent or unreadable records
    /// yield an empty list rather than an error.
    async fn load_all(&self) -> RepositoryResult<Vec<Conversation>> {
        let Some(raw) = self.store.get(keys::CONVERSATIONS).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(list) => Ok(list),
            Err(err) => {
                warn!("stored conversation list unreadable, starting empty: {err}");
                Ok(Vec::new())
            }
        }
    }

    /// Persist the list. A capacity failure triggers one eviction pass and
    /// one retry; the second failure is reported, never thrown past here.
    async fn write_all(&self, mut all: Vec<Conversation>) -> RepositoryResult<()> {
        let json = serde_json::to_string(&all).map_err(StorageError::from)?;
        match self.store.set(keys::CONVERSATIONS, &json).await {
            Ok(()) => Ok(()),
            Err(StorageError::CapacityExceeded) => {
                debug!("conversation write over capacity, evicting and retrying");
                if !evict_pass(&mut all) {
                    return Err(StorageError::CapacityExceeded.into());
                }
                let json = serde_json::to_string(&all).map_err(StorageError::from)?;
                self.store
                    .set(keys::CONVERSATIONS, &json)
                    .await
                    .map_err(Into::into)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Recompute the derived fields of a conversation before persisting.
fn normalize(conversation: &mut Conversation) {
    conversation.updated_at = Utc::now();
    if conversation.updated_at < conversation.created_at {
        conversation.created_at = conversation.updated_at;
    }
    conversation.recount();

    if let Some(last) = conversation.messages.last() {
        conversation.preview = truncate_chars(&last.content, PREVIEW_CHARS);
    }

    if conversation.title == Conversation::DEFAULT_TITLE
        && conversation.messages.len() >= 2
    {
        if let Some(first_user) = conversation
            .messages
            .iter()
            .find(|m| m.role == MessageRole::User)
        {
            conversation.title = truncate_chars(&first_user.content, TITLE_CHARS);
        }
    }
}

/// Pinned first, then most recently updated; stable for ties.
fn sort_for_display(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| match (a.pinned, b.pinned) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.updated_at.cmp(&a.updated_at),
    });
}

/// Drop conversations past the ceiling, oldest `updated_at` first.
///
/// Pinned conversations are not exempt: the storage layer cannot tell which
/// evictions the user would mind, so the documented rule is strictly by age.
fn evict_to_ceiling(conversations: &mut Vec<Conversation>) {
    while conversations.len() > MAX_CONVERSATIONS {
        remove_oldest(conversations);
    }
}

/// One eviction pass for a capacity failure: back down to the ceiling, or
/// drop the single oldest conversation when already under it. The last
/// remaining conversation is never evicted out from under its own write.
/// Returns whether anything was removed.
fn evict_pass(conversations: &mut Vec<Conversation>) -> bool {
    if conversations.len() <= 1 {
        return false;
    }
    if conversations.len() > MAX_CONVERSATIONS {
        evict_to_ceiling(conversations);
    } else {
        remove_oldest(conversations);
    }
    true
}

fn remove_oldest(conversations: &mut Vec<Conversation>) {
    if let Some((index, _)) = conversations
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| c.updated_at)
    {
        let evicted = conversations.remove(index);
        debug!("evicted conversation {} ({})", evicted.id, evicted.title);
    }
}
