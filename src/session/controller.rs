//! The compose, send, await, apply cycle over one active conversation.
//!
//! Locking discipline: every operation holds the session mutex for its full
//! duration except the mediator await inside [`SessionController::send`],
//! which runs unlocked so navigation and pinning stay responsive. A reply
//! that lands after the user navigated away is applied to the conversation
//! it targeted, through the repository.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Settings, SettingsStore};
use crate::conversations::{
    Conversation, ConversationId, ConversationRepository, Message, MessageRole,
    RepositoryError,
};
use crate::protocol::{ChatReply, ChatRequest, WireMessage, WireRole};

use super::events::{NoticeKind, SessionEvents};
use super::gateway::{Mediator, MediatorFailure};
use super::{SessionError, SessionResult};

/// Persona name bound, matching the rename form.
const MAX_NAME_CHARS: usize = 50;

/// Where the session state machine currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing in flight; sends are accepted.
    Idle,
    /// A send is being validated and recorded.
    Composing,
    /// The request is being issued to the mediator.
    Sending,
    /// Waiting on the mediator.
    AwaitingReply,
    /// A reply or failure notice is being recorded.
    Applying,
    /// Retries exhausted; cleared by the next user action.
    Error,
}

/// Controller tuning. Defaults mirror the shipped client.
#[derive(Clone, Debug)]
pub struct SessionControllerConfig {
    /// Failures tolerated before the session enters [`SessionState::Error`].
    pub max_retries: u32,
    /// Per-message character bound, pre-escape.
    pub max_message_chars: usize,
    /// Trailing messages sent as context, not counting the new one.
    pub context_window: usize,
    /// Retry arming delay; scaled by the attempt number.
    pub retry_base_delay: Duration,
    /// Periodic flush cadence.
    pub autosave_interval: Duration,
}

impl Default for SessionControllerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_message_chars: 1000,
            context_window: 20,
            retry_base_delay: Duration::from_secs(1),
            autosave_interval: Duration::from_secs(30),
        }
    }
}

/// What a completed send produced.
#[derive(Debug)]
pub enum SendOutcome {
    /// The mediator answered; the reply is already in the transcript.
    Replied(ChatReply),
    /// The mediator failed; a themed notice is already in the transcript.
    Failed {
        /// The classified failure.
        failure: MediatorFailure,
        /// Whether another attempt was armed (never auto-fired).
        retry_armed: bool,
    },
}

/// Mutable session core, guarded by the controller's mutex.
struct ActiveSession {
    conversation: Option<Conversation>,
    state: SessionState,
    retry_count: u32,
    retry_armed_until: Option<Instant>,
    /// Set while the in-memory copy may be ahead of storage; the periodic
    /// flush retries writes that failed inline.
    dirty: bool,
}

impl ActiveSession {
    fn empty() -> Self {
        Self {
            conversation: None,
            state: SessionState::Idle,
            retry_count: 0,
            retry_armed_until: None,
            dirty: false,
        }
    }
}

/// Drives one user's chat session against a mediator.
pub struct SessionController {
    repository: Arc<ConversationRepository>,
    settings: SettingsStore,
    mediator: Arc<dyn Mediator>,
    events: Arc<dyn SessionEvents>,
    config: SessionControllerConfig,
    session: Arc<Mutex<ActiveSession>>,
    autosave: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Assemble a controller. Call [`start`](Self::start) before use.
    #[must_use]
    pub fn new(
        repository: Arc<ConversationRepository>,
        settings: SettingsStore,
        mediator: Arc<dyn Mediator>,
        events: Arc<dyn SessionEvents>,
        config: SessionControllerConfig,
    ) -> Self {
        Self {
            repository,
            settings,
            mediator,
            events,
            config,
            session: Arc::new(Mutex::new(ActiveSession::empty())),
            autosave: StdMutex::new(None),
        }
    }

    /// Resume the last active conversation, falling back to the most
    /// recently updated one, falling back to a fresh chat. Also spawns the
    /// periodic flush task.
    ///
    /// # Errors
    /// Propagates persistence failures; a dangling last-active pointer is
    /// not an error.
    pub async fn start(&self) -> SessionResult<()> {
        match self.repository.stats().await {
            Ok(stats) => info!(
                conversations = stats.conversation_count,
                messages = stats.message_count,
                "conversation store loaded"
            ),
            Err(err) => warn!("could not read store stats: {err}"),
        }

        let resumed = match self.repository.last_active().await? {
            Some(id) => self.load_chat(id).await.is_ok(),
            None => false,
        };
        if !resumed {
            let known = self.repository.list().await?;
            match known.into_iter().max_by_key(|c| c.updated_at) {
                Some(recent) => {
                    self.load_chat(recent.id).await?;
                }
                None => {
                    self.new_chat().await?;
                }
            }
        }
        self.spawn_autosave();
        Ok(())
    }

    /// Create a fresh conversation seeded with a welcome message and make
    /// it current.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub async fn new_chat(&self) -> SessionResult<ConversationId> {
        let settings = self.settings_or_default().await;
        let mut conversation = Conversation::new();
        let welcome = Message::new(
            MessageRole::Assistant,
            format!(
                "{} awakens anew—the flame dances with anticipation. \
                 What wisdom do you seek?",
                settings.name
            ),
        );
        conversation.push_message(welcome.clone());
        let id = conversation.id;

        let mut session = self.session.lock().await;
        session.conversation = Some(conversation.clone());
        session.dirty = true;
        self.repository.upsert(conversation).await?;
        self.repository.set_last_active(Some(id)).await?;
        session.dirty = false;
        if session.state == SessionState::Error {
            session.state = SessionState::Idle;
        }
        drop(session);

        info!(conversation = %id, "started new conversation");
        self.events.message_appended(id, &welcome);
        self.events.conversation_list_changed();
        self.events.notice(NoticeKind::Success, "New conversation started");
        Ok(id)
    }

    /// Make an existing conversation current.
    ///
    /// # Errors
    /// `NotFound` leaves the session unchanged; a notice is emitted.
    pub async fn load_chat(&self, id: ConversationId) -> SessionResult<()> {
        let conversation = match self.repository.get(id).await {
            Ok(conversation) => conversation,
            Err(RepositoryError::NotFound(id)) => {
                self.events.notice(NoticeKind::Error, "Chat not found");
                return Err(SessionError::NotFound(id));
            }
            Err(other) => return Err(other.into()),
        };
        self.repository.set_last_active(Some(id)).await?;

        let mut session = self.session.lock().await;
        session.conversation = Some(conversation);
        session.dirty = false;
        if session.state == SessionState::Error {
            session.state = SessionState::Idle;
        }
        let state = session.state;
        drop(session);

        self.events.state_changed(state);
        Ok(())
    }

    /// Send one user message through the mediator and record the outcome.
    ///
    /// Mediator failures are not errors here; they come back as
    /// [`SendOutcome::Failed`] after the themed notice lands in the
    /// transcript. Errors are caller mistakes and persistence failures.
    ///
    /// # Errors
    /// `Busy` while another send is in flight, `EmptyMessage` and
    /// `MessageTooLong` on bad input, `Persistence` if recording fails.
    pub async fn send(&self, text: &str) -> SessionResult<SendOutcome> {
        let message = text.trim();
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(SessionError::MessageTooLong {
                max: self.config.max_message_chars,
            });
        }
        let settings = self.settings_or_default().await;

        // Compose phase: record the user message and capture the context
        // window, all under the lock.
        let mut session = self.session.lock().await;
        match session.state {
            SessionState::Idle | SessionState::Error => {}
            _ => return Err(SessionError::Busy),
        }
        session.state = SessionState::Composing;
        session.retry_armed_until = None;

        let conversation = session.conversation.get_or_insert_with(|| {
            let mut fresh = Conversation::new();
            fresh.push_message(Message::new(
                MessageRole::Assistant,
                format!(
                    "{} awakens anew—the flame dances with anticipation. \
                     What wisdom do you seek?",
                    settings.name
                ),
            ));
            fresh
        });
        let target = conversation.id;

        // Context is strictly the messages that precede the new one.
        let tail = conversation
            .messages
            .len()
            .saturating_sub(self.config.context_window);
        let history: Vec<WireMessage> = conversation.messages[tail..]
            .iter()
            .map(|m| WireMessage::new(wire_role(m.role), m.content.as_str()))
            .collect();

        let user_message = Message::new(MessageRole::User, message);
        if let Err(err) = self
            .append_to_target(&mut session, target, user_message)
            .await
        {
            session.state = SessionState::Idle;
            return Err(err);
        }
        session.state = SessionState::Sending;
        drop(session);
        self.events.state_changed(SessionState::Sending);

        let request = ChatRequest {
            message: message.to_string(),
            conversation_history: history,
            ase_state: settings.to_ase_state(),
        };
        {
            let mut session = self.session.lock().await;
            session.state = SessionState::AwaitingReply;
        }
        self.events.state_changed(SessionState::AwaitingReply);
        debug!(conversation = %target, "awaiting mediator reply");
        let result = self.mediator.request_reply(request).await;

        // Apply phase: the reply goes to the conversation it targeted even
        // if the user has since navigated elsewhere.
        let mut session = self.session.lock().await;
        session.state = SessionState::Applying;
        let outcome = match result {
            Ok(reply) => {
                let recorded = self
                    .append_to_target(
                        &mut session,
                        target,
                        Message::new(MessageRole::Assistant, reply.response.clone()),
                    )
                    .await;
                session.retry_count = 0;
                session.retry_armed_until = None;
                session.state = SessionState::Idle;
                recorded.map(|()| SendOutcome::Replied(reply))
            }
            Err(failure) => {
                let copy = failure_copy(&failure);
                let recorded = self
                    .append_to_target(
                        &mut session,
                        target,
                        Message::new(MessageRole::Assistant, copy),
                    )
                    .await;
                self.events.notice(NoticeKind::Error, copy);
                let retry_armed = if session.retry_count < self.config.max_retries {
                    session.retry_count += 1;
                    session.retry_armed_until = Some(
                        Instant::now()
                            + self.config.retry_base_delay * session.retry_count,
                    );
                    session.state = SessionState::Idle;
                    true
                } else {
                    warn!(conversation = %target, "retries exhausted");
                    session.state = SessionState::Error;
                    false
                };
                recorded.map(|()| SendOutcome::Failed {
                    failure,
                    retry_armed,
                })
            }
        };
        let state = session.state;
        drop(session);
        self.events.state_changed(state);
        outcome
    }

    /// Delete a conversation. Deleting the current one promotes the most
    /// recently updated survivor, or seeds a fresh chat when none remain.
    ///
    /// # Errors
    /// Propagates persistence failures; deleting an unknown id is a no-op.
    pub async fn delete_chat(&self, id: ConversationId) -> SessionResult<()> {
        self.repository.delete(id).await?;

        let was_current = {
            let mut session = self.session.lock().await;
            let was = session.conversation.as_ref().map(|c| c.id) == Some(id);
            if was {
                session.conversation = None;
                session.dirty = false;
            }
            was
        };
        if was_current {
            let survivors = self.repository.list().await?;
            match survivors.into_iter().max_by_key(|c| c.updated_at) {
                Some(recent) => {
                    self.load_chat(recent.id).await?;
                }
                None => {
                    self.new_chat().await?;
                }
            }
        }

        self.events.conversation_list_changed();
        self.events.notice(NoticeKind::Info, "Conversation deleted");
        Ok(())
    }

    /// Flip a conversation's pin and return the new value.
    ///
    /// # Errors
    /// `NotFound` if the conversation does not exist.
    pub async fn toggle_pin(&self, id: ConversationId) -> SessionResult<bool> {
        let mut conversation = self.repository.get(id).await?;
        conversation.pinned = !conversation.pinned;
        let pinned = conversation.pinned;
        self.repository.upsert(conversation).await?;

        let mut session = self.session.lock().await;
        if let Some(current) = session
            .conversation
            .as_mut()
            .filter(|c| c.id == id)
        {
            current.pinned = pinned;
        }
        drop(session);

        self.events.conversation_list_changed();
        self.events.notice(
            NoticeKind::Info,
            if pinned {
                "Conversation pinned"
            } else {
                "Conversation unpinned"
            },
        );
        Ok(pinned)
    }

    /// Rename the persona and acknowledge it in the transcript.
    ///
    /// # Errors
    /// `EmptyMessage` on a blank name, `NameTooLong` past 50 characters.
    pub async fn rename_persona(&self, name: &str) -> SessionResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(SessionError::NameTooLong {
                max: MAX_NAME_CHARS,
            });
        }

        self.settings
            .update(|settings| settings.name = name.to_string())
            .await
            .map_err(|err| SessionError::Persistence(err.to_string()))?;

        let ack = Message::new(
            MessageRole::Assistant,
            format!("I am now {name}—the flame takes new form. How may I serve you?"),
        );
        let mut session = self.session.lock().await;
        if let Some(target) = session.conversation.as_ref().map(|c| c.id) {
            self.append_to_target(&mut session, target, ack).await?;
        }
        drop(session);

        self.events
            .notice(NoticeKind::Success, &format!("Renamed to {name}"));
        Ok(())
    }

    /// Wipe the current transcript and re-seed a welcome message. The
    /// conversation itself, title included, survives.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub async fn clear_current(&self) -> SessionResult<()> {
        let settings = self.settings_or_default().await;
        let mut session = self.session.lock().await;
        let Some(conversation) = session.conversation.as_mut() else {
            return Ok(());
        };
        let target = conversation.id;
        conversation.messages.clear();
        let welcome = Message::new(
            MessageRole::Assistant,
            format!(
                "{} stands ready—the slate is clean, the flame renewed. \
                 What shall we explore?",
                settings.name
            ),
        );
        self.append_to_target(&mut session, target, welcome).await?;
        drop(session);

        self.events.notice(NoticeKind::Info, "Conversation cleared");
        Ok(())
    }

    /// Delete every conversation and start fresh.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub async fn clear_all(&self) -> SessionResult<()> {
        self.repository.clear().await?;
        {
            let mut session = self.session.lock().await;
            session.conversation = None;
            session.dirty = false;
            session.retry_count = 0;
            session.retry_armed_until = None;
        }
        self.new_chat().await?;
        self.events.notice(NoticeKind::Info, "All conversations cleared");
        Ok(())
    }

    /// Wipe conversations and settings both, then start fresh. The durable
    /// client token survives; it is identity, not state.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub async fn reset_session(&self) -> SessionResult<()> {
        self.repository.clear().await?;
        self.settings
            .save(&Settings::default())
            .await
            .map_err(|err| SessionError::Persistence(err.to_string()))?;
        {
            let mut session = self.session.lock().await;
            *session = ActiveSession::empty();
        }
        self.new_chat().await?;
        self.events.notice(NoticeKind::Info, "Session reset");
        Ok(())
    }

    /// Push any unflushed transcript state to storage. Called on
    /// visibility loss and shutdown; safe to call at any time.
    ///
    /// The lock is held across the write. A snapshot taken and written
    /// unlocked could land after a concurrent send's write and roll the
    /// durable copy back to the older transcript.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub async fn flush(&self) -> SessionResult<()> {
        let mut session = self.session.lock().await;
        if !session.dirty {
            return Ok(());
        }
        if let Some(conversation) = session.conversation.clone() {
            self.repository.upsert(conversation).await?;
        }
        session.dirty = false;
        Ok(())
    }

    /// Stop the periodic flush task and write out anything pending.
    pub async fn shutdown(&self) {
        if let Ok(mut slot) = self.autosave.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        if let Err(err) = self.flush().await {
            warn!("final flush failed: {err}");
        }
    }

    /// Current state of the machine.
    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    /// A copy of the current conversation, if any.
    pub async fn current_conversation(&self) -> Option<Conversation> {
        self.session.lock().await.conversation.clone()
    }

    /// Time left until the armed retry would be due, if one is armed.
    pub async fn retry_armed_for(&self) -> Option<Duration> {
        self.session
            .lock()
            .await
            .retry_armed_until
            .map(|until| until.saturating_duration_since(Instant::now()))
    }

    /// Append `message` to `target`, preferring the in-memory copy when it
    /// is still current, and flush. The dirty flag stays set if the write
    /// fails, so the periodic flush retries it.
    async fn append_to_target(
        &self,
        session: &mut ActiveSession,
        target: ConversationId,
        message: Message,
    ) -> SessionResult<()> {
        if let Some(conversation) = session
            .conversation
            .as_mut()
            .filter(|c| c.id == target)
        {
            conversation.push_message(message.clone());
            session.dirty = true;
            self.repository.upsert(conversation.clone()).await?;
            session.dirty = false;
        } else {
            let mut conversation = self.repository.get(target).await?;
            conversation.push_message(message.clone());
            self.repository.upsert(conversation).await?;
        }
        self.events.message_appended(target, &message);
        Ok(())
    }

    fn spawn_autosave(&self) {
        let session = Arc::clone(&self.session);
        let repository = Arc::clone(&self.repository);
        let interval = self.config.autosave_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // Same discipline as flush: the write happens under the
                // lock so it can never roll back a concurrent send.
                let mut session = session.lock().await;
                if !session.dirty {
                    continue;
                }
                let Some(conversation) = session.conversation.clone() else {
                    session.dirty = false;
                    continue;
                };
                match repository.upsert(conversation).await {
                    Ok(()) => session.dirty = false,
                    Err(err) => warn!("autosave flush failed: {err}"),
                }
            }
        });
        if let Ok(mut slot) = self.autosave.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    async fn settings_or_default(&self) -> Settings {
        match self.settings.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("settings unreadable, using defaults: {err}");
                Settings::default()
            }
        }
    }
}

const fn wire_role(role: MessageRole) -> WireRole {
    match role {
        MessageRole::User => WireRole::User,
        MessageRole::Assistant => WireRole::Assistant,
    }
}

/// Themed transcript copy for each failure class.
fn failure_copy(failure: &MediatorFailure) -> &'static str {
    match failure {
        MediatorFailure::RateLimited { .. } => {
            "The flame burns too bright—please wait a moment before trying again."
        }
        MediatorFailure::QuotaExhausted => {
            "The cosmic fuel runs low. Please try again later."
        }
        MediatorFailure::Network(_) => {
            "Connection to the cosmic realm interrupted. Check your internet connection."
        }
        MediatorFailure::Other(_) => {
            "The flame flickers in cosmic turbulence. Please try again."
        }
    }
}
