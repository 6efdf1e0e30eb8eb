//! The seam between the session controller and whatever answers it.

use async_trait::async_trait;

use crate::protocol::{ChatReply, ChatRequest, ErrorBody};

/// Header carrying the stored client token for admission control.
const CLIENT_HEADER: &str = "x-ase-client";

/// Failure taxonomy a mediator reports back to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediatorFailure {
    /// The mediator throttled this client.
    RateLimited {
        /// Milliseconds until the window reopens, when known.
        retry_after_ms: Option<u64>,
    },
    /// The upstream account is out of fuel.
    QuotaExhausted,
    /// The mediator could not be reached at all.
    Network(String),
    /// Anything else, with whatever detail survived the wire.
    Other(String),
}

/// Answers session sends. Implemented by the in-process request mediator
/// and by [`HttpMediator`] for a remote deployment.
#[async_trait]
pub trait Mediator: Send + Sync {
    /// Obtain one reply for a composed request.
    async fn request_reply(&self, request: ChatRequest)
        -> Result<ChatReply, MediatorFailure>;
}

/// Talks to a remote mediator over HTTP.
pub struct HttpMediator {
    client: reqwest::Client,
    endpoint: String,
    client_token: String,
}

impl HttpMediator {
    /// Point at a mediator. `base_url` is scheme and authority only;
    /// `client_token` is the durable per-install identity from storage.
    #[must_use]
    pub fn new(base_url: &str, client_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            client_token: client_token.into(),
        }
    }
}

#[async_trait]
impl Mediator for HttpMediator {
    async fn request_reply(
        &self,
        request: ChatRequest,
    ) -> Result<ChatReply, MediatorFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CLIENT_HEADER, &self.client_token)
            .json(&request)
            .send()
            .await
            .map_err(|err| MediatorFailure::Network(err.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return response
                .json::<ChatReply>()
                .await
                .map_err(|err| MediatorFailure::Other(err.to_string()));
        }

        let body = response.json::<ErrorBody>().await.ok();
        Err(classify(status, body.as_ref()))
    }
}

/// Map a mediator HTTP status back into the session failure taxonomy.
fn classify(status: u16, body: Option<&ErrorBody>) -> MediatorFailure {
    match status {
        429 => MediatorFailure::RateLimited {
            retry_after_ms: body.and_then(|b| b.retry_after),
        },
        503 => MediatorFailure::QuotaExhausted,
        _ => MediatorFailure::Other(
            body.map_or_else(|| format!("HTTP {status}"), |b| b.error.clone()),
        ),
    }
}
