//! Client-side session management.
//!
//! The controller owns at most one active conversation at a time and drives
//! the compose, send, await, apply cycle against a [`Mediator`]. Everything
//! the surrounding UI needs to observe arrives through the [`SessionEvents`]
//! capability, so the controller itself never touches presentation.

pub mod controller;
pub mod events;
pub mod gateway;

pub use controller::{
    SendOutcome, SessionController, SessionControllerConfig, SessionState,
};
pub use events::{NoticeKind, NullEvents, SessionEvents};
pub use gateway::{HttpMediator, Mediator, MediatorFailure};

use thiserror::Error;

use crate::conversations::{ConversationId, RepositoryError};

/// Errors surfaced to the caller of a session operation. Mediator failures
/// are not here; those are handled in-band as themed notices.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A send is already in flight.
    #[error("a message is already being sent")]
    Busy,
    /// The trimmed input was empty.
    #[error("message is empty")]
    EmptyMessage,
    /// The input exceeded the per-message character bound.
    #[error("message too long (max {max} characters)")]
    MessageTooLong {
        /// The configured bound.
        max: usize,
    },
    /// The persona name exceeded its bound.
    #[error("name too long (max {max} characters)")]
    NameTooLong {
        /// The configured bound.
        max: usize,
    },
    /// The requested conversation does not exist.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
    /// The durable store failed underneath the session.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<RepositoryError> for SessionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            RepositoryError::Persistence(detail) => Self::Persistence(detail),
        }
    }
}

/// Convenience alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
