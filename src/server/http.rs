//! HTTP server implementation
//!
//! Implements:
//! - `POST /` - webhook receiver (origin check, signature check, dispatch)
//! - `GET /status` - liveness check
//!
//! Any other method on `/` is answered with 405.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{ConfigError, ConfigSource};
use crate::hooks::dispatch::DispatchError;
use crate::hooks::handler::{handle_event, OutcomeBody, WebhookOutcome};
use crate::hooks::metadata::{EVENT_HEADER, PING_EVENT};
use crate::hooks::origin::{check_origin, client_ip, AllowList, OriginError};
use crate::hooks::signature::{verify_signature, SignatureError, SIGNATURE_HEADER};

/// Max accepted payload size (GitHub caps deliveries at 25 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigSource>,
    pub allow_list: Arc<dyn AllowList>,
}

impl AppState {
    pub fn new(config: Arc<ConfigSource>, allow_list: Arc<dyn AllowList>) -> Self {
        AppState { config, allow_list }
    }
}

/// Request-level failures, each mapped to one status code.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to render response: {0}")]
    Render(#[from] serde_json::Error),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::Origin(OriginError::Denied(_)) => StatusCode::FORBIDDEN,
            RequestError::Origin(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RequestError::Signature(SignatureError::UnsupportedAlgorithm(_)) => {
                StatusCode::NOT_IMPLEMENTED
            }
            RequestError::Signature(_) => StatusCode::FORBIDDEN,
            RequestError::MalformedJson(_) => StatusCode::BAD_REQUEST,
            RequestError::Dispatch(_) | RequestError::Config(_) | RequestError::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(target: "http", status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(target: "http", status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    create_router_with_limit(state, DEFAULT_MAX_BODY_BYTES)
}

/// Create the HTTP router with a custom body size limit
pub fn create_router_with_limit(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/",
            post(webhook_handler).fallback(method_not_allowed_handler),
        )
        .route("/status", get(status_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn status_handler() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn method_not_allowed_handler() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "method not allowed" })),
    )
        .into_response()
}

/// POST / - receive one webhook delivery
async fn webhook_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    match process_delivery(&state, peer, &headers, &body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn process_delivery(
    state: &AppState,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, RequestError> {
    let config = state.config.load()?;

    if config.github_ips_only {
        let addr = client_ip(headers, peer)?;
        check_origin(state.allow_list.as_ref(), addr).await?;
    }

    if !config.enforce_secret.is_empty() {
        let signature = match headers.get(SIGNATURE_HEADER) {
            Some(value) => Some(value.to_str().map_err(|_| SignatureError::Mismatch)?),
            None => None,
        };
        verify_signature(&config.enforce_secret, body, signature)?;
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(PING_EVENT);

    if event == PING_EVENT {
        return outcome_response(WebhookOutcome::Pong);
    }

    let payload: Value = serde_json::from_slice(body).map_err(|e| {
        warn!(target: "http", event, error = %e, "Malformed JSON payload");
        RequestError::MalformedJson(e.to_string())
    })?;

    let outcome = handle_event(&config, event, &payload).await?;
    outcome_response(outcome)
}

fn outcome_response(outcome: WebhookOutcome) -> Result<Response, RequestError> {
    let response = match outcome.body()? {
        OutcomeBody::Json(value) => (StatusCode::OK, Json(value)).into_response(),
        OutcomeBody::Rendered(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            text,
        )
            .into_response(),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::origin::StaticAllowList;
    use crate::hooks::signature::sign;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router(config: Config) -> Router {
        let allow_list = StaticAllowList::from_cidrs(&["192.30.252.0/22"]).unwrap();
        create_router(AppState::new(
            Arc::new(ConfigSource::fixed(config)),
            Arc::new(allow_list),
        ))
    }

    fn open_config() -> Config {
        Config::missing()
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn delivery() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let router = test_router(open_config());
        let req = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_get_root_not_allowed() {
        let router = test_router(open_config());
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_missing_event_header_is_ping() {
        let router = test_router(open_config());
        let req = delivery().body(Body::from("{}")).unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "msg": "pong" }));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let router = test_router(open_config());
        let req = delivery()
            .header("x-github-event", "push")
            .body(Body::from("{"))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_nop_when_no_hooks() {
        let router = test_router(open_config());
        let req = delivery()
            .header("x-github-event", "push")
            .body(Body::from(r#"{"ref":"refs/heads/main"}"#))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "nop" }));
    }

    #[tokio::test]
    async fn test_signature_missing_forbidden() {
        let router = test_router(Config {
            enforce_secret: "secret".to_string(),
            ..open_config()
        });
        let req = delivery()
            .header("x-github-event", "push")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_signature_unsupported_algorithm() {
        let router = test_router(Config {
            enforce_secret: "secret".to_string(),
            ..open_config()
        });
        let req = delivery()
            .header("x-hub-signature", "sha256=abcd")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_signature_valid_accepted() {
        let router = test_router(Config {
            enforce_secret: "secret".to_string(),
            ..open_config()
        });
        let body = r#"{"zen":"Keep it logically awesome."}"#;
        let req = delivery()
            .header("x-hub-signature", sign("secret", body.as_bytes()).unwrap())
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "msg": "pong" }));
    }

    #[tokio::test]
    async fn test_origin_checked_before_signature() {
        let router = test_router(Config {
            github_ips_only: true,
            enforce_secret: "secret".to_string(),
            ..open_config()
        });
        let req = delivery()
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_origin_allowed_via_forwarded_for() {
        let router = test_router(Config {
            github_ips_only: true,
            ..open_config()
        });
        let req = delivery()
            .header("x-forwarded-for", "192.30.252.41, 10.0.0.1")
            .body(Body::from("{}"))
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_origin_without_address_is_server_error() {
        let router = test_router(Config {
            github_ips_only: true,
            ..open_config()
        });
        let req = delivery().body(Body::from("{}")).unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let allow_list = StaticAllowList::from_cidrs::<&str>(&[]).unwrap();
        let router = create_router_with_limit(
            AppState::new(
                Arc::new(ConfigSource::fixed(open_config())),
                Arc::new(allow_list),
            ),
            16,
        );
        let req = delivery().body(Body::from(vec![b' '; 64])).unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_request_error_status_mapping() {
        assert_eq!(
            RequestError::from(SignatureError::Missing).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RequestError::from(SignatureError::Mismatch).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RequestError::from(SignatureError::UnsupportedAlgorithm("md5".into())).status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            RequestError::from(OriginError::Fetch("timeout".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RequestError::MalformedJson("eof".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
