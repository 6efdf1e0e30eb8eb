//! Application state shared across all request handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::llm::ModelProvider;

use super::mediator::RequestMediator;

/// Shared application state.
pub struct AppState<P> {
    /// The mediation pipeline every chat request runs through.
    pub mediator: RequestMediator<P>,
    started_at: Instant,
}

impl<P: ModelProvider> AppState<P> {
    /// Wrap a mediator for sharing across handlers.
    #[must_use]
    pub fn new(mediator: RequestMediator<P>) -> Arc<Self> {
        Arc::new(Self {
            mediator,
            started_at: Instant::now(),
        })
    }

    /// Seconds since the state was created, reported by the health endpoint.
    #[must_use]
    pub fn uptime(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
