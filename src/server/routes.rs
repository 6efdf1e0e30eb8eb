//! HTTP route handlers for the chat mediator API.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::services::ServeDir;

use crate::llm::ModelProvider;
use crate::protocol::{ChatRequest, ErrorBody, HealthBody};

use super::mediator::MediationError;
use super::state::AppState;

/// Header a cooperating client uses to identify itself for admission control.
const CLIENT_HEADER: &str = "x-ase-client";

/// Origin key used when no identifying header is present.
const ANONYMOUS_ORIGIN: &str = "anonymous";

/// Liveness copy returned by the health endpoint.
const HEALTH_STATUS: &str = "The flame burns bright";

/// Create the API router with all routes.
pub fn create_router<P>(state: Arc<AppState<P>>) -> Router
where
    P: ModelProvider + 'static,
{
    Router::new()
        .route("/api/health", get(health_check::<P>))
        .route("/api/chat", post(chat::<P>))
        .fallback_service(ServeDir::new("static"))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check<P>(State(state): State<Arc<AppState<P>>>) -> impl IntoResponse
where
    P: ModelProvider + 'static,
{
    Json(HealthBody {
        status: HEALTH_STATUS.to_string(),
        timestamp: Utc::now(),
        uptime: state.uptime(),
    })
}

/// Handle one mediated chat request.
async fn chat<P>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)>
where
    P: ModelProvider + 'static,
{
    let origin = origin_key(&headers);
    let reply = state
        .mediator
        .handle(&request, &origin)
        .await
        .map_err(to_response)?;
    Ok(Json(reply))
}

/// Pick the admission-control key for a request: the cooperating client
/// header first, then the proxy chain, then a shared anonymous bucket.
fn origin_key(headers: &HeaderMap) -> String {
    if let Some(client) = header_str(headers, CLIENT_HEADER) {
        return client.to_string();
    }
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        // First entry is the originating client.
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    ANONYMOUS_ORIGIN.to_string()
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Map a mediation failure onto its status code and wire body. The error
/// copy on the wire is exactly the variant's display string.
fn to_response(err: MediationError) -> (StatusCode, Json<ErrorBody>) {
    let status = match err {
        MediationError::InvalidInput => StatusCode::BAD_REQUEST,
        MediationError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        MediationError::QuotaExhausted => StatusCode::SERVICE_UNAVAILABLE,
        MediationError::UpstreamError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let retry_after = match &err {
        MediationError::RateLimited { retry_after } => {
            Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX))
        }
        _ => None,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            retry_after,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, ProviderError, SamplingParams};
    use crate::protocol::{Usage, WireMessage};
    use crate::server::mediator::{MediatorConfig, RequestMediator};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        async fn complete(
            &self,
            messages: &[WireMessage],
            _params: &SamplingParams,
        ) -> Result<Completion, ProviderError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion {
                content: format!("echo: {last}"),
                usage: Usage::default(),
            })
        }
    }

    fn router() -> Router {
        let mediator = RequestMediator::new(EchoProvider, MediatorConfig::default());
        create_router(AppState::new(mediator))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header(CLIENT_HEADER, "test-client")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_flame_and_uptime() {
        let response = router()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "The flame burns bright");
        assert!(json["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let response = router()
            .oneshot(chat_request(r#"{"message":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["response"], "echo: hello");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_blank_message_maps_to_bad_request() {
        let response = router()
            .oneshot(chat_request(r#"{"message":"   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["error"], "The flame cannot understand—speak clearly.");
    }

    #[tokio::test]
    async fn test_eleventh_request_from_one_origin_is_throttled() {
        let app = router();
        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(chat_request(r#"{"message":"hi"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(chat_request(r#"{"message":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let json = body_json(response).await;
        assert_eq!(
            json["error"],
            "The flame burns too bright—rest before igniting again."
        );
        assert!(json["retryAfter"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_origin_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(origin_key(&headers), "anonymous");

        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());
        assert_eq!(origin_key(&headers), "10.0.0.9");

        headers.insert(CLIENT_HEADER, "token-abc".parse().unwrap());
        assert_eq!(origin_key(&headers), "token-abc");
    }
}
