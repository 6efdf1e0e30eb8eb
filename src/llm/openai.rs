//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::protocol::{Usage, WireMessage};

use super::{Completion, ModelProvider, ProviderError, SamplingParams};

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Environment variable carrying the API key.
pub const API_KEY_ENV: &str = "ASE_OPENAI_API_KEY";
/// Environment variable overriding the API base URL.
pub const BASE_URL_ENV: &str = "ASE_OPENAI_BASE_URL";

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Full-request timeout, generous enough for slow generations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    max_tokens: u32,
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Deserialize, Default)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Async client for an OpenAI-style `/v1/chat/completions` endpoint.
pub struct OpenAiChatProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatProvider {
    /// Create a client for `base_url` with `api_key`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Create a client from `ASE_OPENAI_API_KEY` / `ASE_OPENAI_BASE_URL`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or the client cannot be built.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| ProviderError::Api {
            status: None,
            message: format!("{API_KEY_ENV} is not set"),
        })?;
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key)
    }
}

#[async_trait]
impl ModelProvider for OpenAiChatProvider {
    async fn complete(
        &self,
        messages: &[WireMessage],
        params: &SamplingParams,
    ) -> Result<Completion, ProviderError> {
        let body = CompletionRequest {
            model: &params.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error: ApiErrorBody = response.json().await.unwrap_or_default();
            return Err(classify_failure(status, &error.error));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Api {
                status: Some(status.as_u16()),
                message: "response carried no choices".to_string(),
            })?;

        Ok(Completion {
            content,
            usage: completion.usage,
        })
    }
}

/// Map a failed upstream response onto the provider error taxonomy.
fn classify_failure(status: StatusCode, detail: &ApiErrorDetail) -> ProviderError {
    let code = detail.code.as_deref().or(detail.kind.as_deref());
    if code == Some("insufficient_quota") {
        return ProviderError::QuotaExhausted;
    }
    if status == StatusCode::TOO_MANY_REQUESTS || code == Some("rate_limit_exceeded") {
        return ProviderError::RateLimited;
    }
    ProviderError::Api {
        status: Some(status.as_u16()),
        message: if detail.message.is_empty() {
            status.to_string()
        } else {
            detail.message.clone()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(code: Option<&str>, message: &str) -> ApiErrorDetail {
        ApiErrorDetail {
            message: message.to_string(),
            code: code.map(ToString::to_string),
            kind: None,
        }
    }

    #[test]
    fn test_quota_code_beats_rate_limit_status() {
        // OpenAI reports quota exhaustion with HTTP 429 plus a code.
        let err = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            &detail(Some("insufficient_quota"), "out of credits"),
        );
        assert!(matches!(err, ProviderError::QuotaExhausted));
    }

    #[test]
    fn test_429_without_code_is_rate_limited() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, &detail(None, ""));
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[test]
    fn test_other_statuses_are_api_errors() {
        let err = classify_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &detail(None, "upstream exploded"),
        );
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
