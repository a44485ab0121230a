use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use firefrp_common::now_ms;
use firefrp_config::FireFrpConfig;
use firefrp_core::{CredentialService, ValidateError};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::rate_limit::{RateLimitDecision, ValidateRateLimiter};
use crate::types::{
    ApiError, HealthResponse, ServerInfoData, ValidateData, ValidateRequest, INTERNAL_ERROR, INVALID_REQUEST,
    KEY_ALREADY_USED, KEY_DISCONNECTED, KEY_EXPIRED, KEY_NOT_FOUND, KEY_REVOKED, RATE_LIMITED,
};

const KEY_PATTERN_MAX_LEN: usize = 128;

#[derive(Clone)]
pub struct ClientApiState {
    pub credentials: Arc<CredentialService>,
    pub rate_limiter: Arc<ValidateRateLimiter>,
    pub config: Arc<FireFrpConfig>,
}

pub fn router(state: ClientApiState) -> Router {
    Router::new()
        .route("/api/v1/validate", post(validate_handler))
        .route("/api/v1/server-info", get(server_info_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .fallback(not_found_handler)
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// §4.9's "single global error handler": a handler panic must still answer
/// with the fixed `INTERNAL_ERROR` shape, never the panic payload or a
/// bare connection reset.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    error!("panic in clientapi handler");
    internal_error_response().into_response()
}

fn is_valid_key_format(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= KEY_PATTERN_MAX_LEN
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

async fn validate_handler(
    State(state): State<ClientApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    if matches!(state.rate_limiter.check(addr.ip()), RateLimitDecision::Denied) {
        return error_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED, "rate limit exceeded");
    }

    let Ok(req) = serde_json::from_slice::<ValidateRequest>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST, "malformed request body");
    };

    if !is_valid_key_format(&req.key) {
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST, "malformed key");
    }

    match state.credentials.validate(&req.key).await {
        Ok(credential) => {
            let frps_addr = resolve_frps_addr(&state.config, &headers);
            let data = ValidateData {
                frps_addr,
                frps_port: state.config.frps.bind_port,
                remote_port: credential.remote_port,
                token: state.config.frps.auth_token.clone(),
                proxy_name: credential.proxy_name,
                expires_at: credential.expires_at,
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({ "ok": true, "data": data })),
            )
        },
        Err(ValidateError::KeyNotFound) => error_response(StatusCode::NOT_FOUND, KEY_NOT_FOUND, "key not found"),
        Err(ValidateError::KeyExpired) => error_response(StatusCode::GONE, KEY_EXPIRED, "key expired"),
        Err(ValidateError::KeyAlreadyUsed) => {
            error_response(StatusCode::CONFLICT, KEY_ALREADY_USED, "key already used")
        },
        Err(ValidateError::KeyRevoked) => error_response(StatusCode::FORBIDDEN, KEY_REVOKED, "key revoked"),
        Err(ValidateError::KeyDisconnected) => {
            error_response(StatusCode::GONE, KEY_DISCONNECTED, "key disconnected")
        },
    }
}

fn resolve_frps_addr(config: &FireFrpConfig, headers: &HeaderMap) -> String {
    if config.frps.bind_addr != "0.0.0.0" {
        return config.frps.bind_addr.clone();
    }
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.rsplit_once(':').map_or(h, |(host, _)| host).to_string())
        .unwrap_or_default()
}

async fn server_info_handler(State(state): State<ClientApiState>) -> Json<serde_json::Value> {
    // `updates.channel` can be changed at runtime via the bot's `channel`
    // command (§4.11), so it is read through `CredentialService` rather
    // than the startup-time config snapshot, unlike the rest of this
    // struct which is effectively immutable after boot.
    let update_channel = state.credentials.update_channel().await.to_string();
    let data = ServerInfoData {
        id: state.config.server.id.clone(),
        name: state.config.server.name.clone(),
        public_addr: state.config.server.public_addr.clone(),
        description: state.config.server.description.clone(),
        client_version: env!("CARGO_PKG_VERSION").to_string(),
        update_channel,
    };
    Json(serde_json::json!({ "ok": true, "data": data }))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_ms(),
    })
}

async fn not_found_handler() -> (StatusCode, Json<serde_json::Value>) {
    error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "not found")
}

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    let error = ApiError {
        code,
        message: message.into(),
    };
    (status, Json(serde_json::json!({ "ok": false, "error": error })))
}

/// Global fallback for unhandled panics/errors inside handlers: never echo
/// internals, always this fixed shape (§4.9).
pub fn internal_error_response() -> (StatusCode, Json<serde_json::Value>) {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, "Internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_accepts_alnum_underscore_dash() {
        assert!(is_valid_key_format("ff-abc123_DEF"));
        assert!(!is_valid_key_format(""));
        assert!(!is_valid_key_format("has space"));
        assert!(!is_valid_key_format("semi;colon"));
    }

    #[test]
    fn key_format_rejects_overlong_keys() {
        let long_key = "a".repeat(129);
        assert!(!is_valid_key_format(&long_key));
        let ok_key = "a".repeat(128);
        assert!(is_valid_key_format(&ok_key));
    }

    #[test]
    fn frps_addr_prefers_configured_bind_addr() {
        let mut config = FireFrpConfig::default();
        config.frps.bind_addr = "203.0.113.5".to_string();
        let headers = HeaderMap::new();
        assert_eq!(resolve_frps_addr(&config, &headers), "203.0.113.5");
    }

    #[test]
    fn frps_addr_falls_back_to_host_header_when_wildcard() {
        let mut config = FireFrpConfig::default();
        config.frps.bind_addr = "0.0.0.0".to_string();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "play.example.com:8080".parse().unwrap());
        assert_eq!(resolve_frps_addr(&config, &headers), "play.example.com");
    }
}
