//! Model provider abstraction and the OpenAI-compatible client.

pub mod openai;

pub use openai::OpenAiChatProvider;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Usage, WireMessage};

/// Errors surfaced by a model provider, pre-classified for the mediator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider throttled this client.
    #[error("provider rate limit exceeded")]
    RateLimited,
    /// The account's quota is exhausted.
    #[error("provider quota exhausted")]
    QuotaExhausted,
    /// The provider could not be reached.
    #[error("provider network error: {0}")]
    Network(String),
    /// Any other provider-reported failure.
    #[error("provider error{}: {message}", status.map(|s| format!(" (http {s})")).unwrap_or_default())]
    Api {
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
        /// Provider-reported message.
        message: String,
    },
}

/// Fixed sampling parameters for an upstream call.
#[derive(Clone, Debug)]
pub struct SamplingParams {
    /// Model identifier.
    pub model: String,
    /// Output token ceiling.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Presence penalty.
    pub presence_penalty: f32,
    /// Frequency penalty.
    pub frequency_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 400,
            temperature: 0.9,
            presence_penalty: 0.1,
            frequency_penalty: 0.1,
        }
    }
}

/// A completed upstream call.
#[derive(Clone, Debug)]
pub struct Completion {
    /// Raw reply text.
    pub content: String,
    /// Token accounting.
    pub usage: Usage,
}

/// The external language-model service, invoked but never reimplemented.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Request one completion for the composed message sequence.
    async fn complete(
        &self,
        messages: &[WireMessage],
        params: &SamplingParams,
    ) -> Result<Completion, ProviderError>;
}
