use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use firefrp_common::notify::{GroupNotification, MotdCancelFn, MotdStartFn, MotdStartRequest, NotifyFn};
use firefrp_common::{now_ms, GameType};
use firefrp_core::CredentialService;
use firefrp_store::CredentialStatus;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, warn};

use crate::loopback::is_loopback_peer;
use crate::types::{CloseProxyContent, LoginContent, NewProxyContent, PingContent, PluginRequest, PluginResponse};

/// Everything the handler needs to make allow/reject decisions and to fire
/// the side-effect callbacks without depending on the `bot`/`motd` crates
/// directly (§4.8).
pub struct PluginState {
    pub credentials: Arc<CredentialService>,
    pub notify: NotifyFn,
    pub motd_start: MotdStartFn,
    pub motd_cancel: MotdCancelFn,
    pub public_addr: String,
}

pub fn router(state: PluginState) -> Router {
    Router::new()
        .route("/frps-plugin/handler", post(handle))
        .with_state(Arc::new(state))
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// §4.8's "never default-allow on exception" applies to panics too: a
/// handler panic must still come back as a deny, not a dropped connection
/// frps would otherwise interpret as a transient error and retry blindly.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    error!("panic in plugin handler");
    Json(PluginResponse::deny("Internal server error")).into_response()
}

async fn handle(
    State(state): State<Arc<PluginState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<PluginRequest>,
) -> Result<Json<PluginResponse>, StatusCode> {
    if !is_loopback_peer(addr.ip()) {
        warn!(peer = %addr, "rejecting non-loopback plugin request");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(dispatch(&state, &req).await))
}

async fn dispatch(state: &PluginState, req: &PluginRequest) -> PluginResponse {
    match req.op.as_str() {
        "Login" => handle_login(state, &req.content).await,
        "NewProxy" => handle_new_proxy(state, &req.content).await,
        "Ping" => handle_ping(state, &req.content).await,
        "CloseProxy" => handle_close_proxy(state, &req.content).await,
        other => {
            error!(op = other, "unknown plugin op");
            PluginResponse::deny("Internal server error")
        },
    }
}

async fn handle_login(state: &PluginState, content: &serde_json::Value) -> PluginResponse {
    let Ok(login) = serde_json::from_value::<LoginContent>(content.clone()) else {
        error!("malformed Login content");
        return PluginResponse::deny("Internal server error");
    };
    let Some(access_key) = login.metas.get("access_key") else {
        return PluginResponse::deny("missing access_key");
    };

    let Some(credential) = state.credentials.get_by_key(access_key).await else {
        return PluginResponse::deny("unknown access key");
    };

    if credential.expires_at <= now_ms() {
        state.credentials.reject_add(access_key.clone(), now_ms()).await;
        state.credentials.audit_client_rejected(Some(credential.id), "login_expired").await;
        return PluginResponse::deny("credential expired");
    }

    match credential.status {
        CredentialStatus::Expired | CredentialStatus::Revoked | CredentialStatus::Disconnected => {
            PluginResponse::deny("credential not active")
        },
        CredentialStatus::Active => PluginResponse::allow(),
        CredentialStatus::Pending => match state.credentials.activate(access_key, &login.run_id).await {
            Some(activated) => {
                if let Some(group_id) = activated.group_id.clone() {
                    (state.notify)(GroupNotification::TunnelConnected {
                        group_id,
                        tunnel_id: activated.tunnel_id.clone(),
                        public_addr: state.public_addr.clone(),
                        remote_port: activated.remote_port,
                        user_name: activated.user_name.clone(),
                        display_game_name: activated.game_type.display_name().to_string(),
                    })
                    .await;
                }
                if activated.game_type == GameType::Minecraft {
                    (state.motd_start)(MotdStartRequest {
                        tunnel_id: activated.tunnel_id.clone(),
                        group_id: activated.group_id.clone(),
                        public_addr: state.public_addr.clone(),
                        remote_port: activated.remote_port,
                    })
                    .await;
                }
                PluginResponse::allow()
            },
            None => PluginResponse::deny("activation race lost"),
        },
    }
}

async fn handle_new_proxy(state: &PluginState, content: &serde_json::Value) -> PluginResponse {
    let Ok(np) = serde_json::from_value::<NewProxyContent>(content.clone()) else {
        error!("malformed NewProxy content");
        return PluginResponse::deny("Internal server error");
    };
    let Some(access_key) = np.user.metas.get("access_key") else {
        return PluginResponse::deny("missing access_key");
    };
    let Some(credential) = state.credentials.get_by_key(access_key).await else {
        return PluginResponse::deny("unknown access key");
    };
    if np.proxy_name != credential.proxy_name {
        return PluginResponse::deny("proxy name mismatch");
    }
    if np.remote_port != credential.remote_port {
        return PluginResponse::deny("remote port mismatch");
    }
    if np.proxy_type != "tcp" {
        return PluginResponse::deny("unsupported proxy type");
    }
    state.credentials.audit_proxy_opened(credential.id).await;
    PluginResponse::allow()
}

async fn handle_ping(state: &PluginState, content: &serde_json::Value) -> PluginResponse {
    let Ok(ping) = serde_json::from_value::<PingContent>(content.clone()) else {
        return PluginResponse::allow();
    };
    let Some(access_key) = ping.user.metas.get("access_key") else {
        return PluginResponse::allow();
    };
    if state.credentials.reject_contains(access_key).await {
        return PluginResponse::deny("credential rejected");
    }
    let Some(credential) = state.credentials.get_by_key(access_key).await else {
        return PluginResponse::deny("unknown access key");
    };
    if credential.status.is_terminal() {
        state.credentials.reject_add(access_key.clone(), now_ms()).await;
        state.credentials.audit_client_rejected(Some(credential.id), "ping_terminal_status").await;
        return PluginResponse::deny("credential not active");
    }
    if credential.expires_at <= now_ms() {
        state.credentials.reject_add(access_key.clone(), now_ms()).await;
        state.credentials.audit_client_rejected(Some(credential.id), "ping_expired").await;
        return PluginResponse::deny("credential expired");
    }
    PluginResponse::allow()
}

async fn handle_close_proxy(state: &PluginState, content: &serde_json::Value) -> PluginResponse {
    let Ok(close) = serde_json::from_value::<CloseProxyContent>(content.clone()) else {
        return PluginResponse::allow();
    };
    let Some(access_key) = close.user.metas.get("access_key") else {
        return PluginResponse::allow();
    };

    if let Some(credential) = state.credentials.get_by_key(access_key).await
        && credential.status == CredentialStatus::Active
        && let Ok(updated) = state.credentials.disconnect(access_key).await
    {
        (state.motd_cancel)(updated.tunnel_id.clone()).await;
        state.credentials.audit_proxy_closed(updated.id).await;
        if let Some(group_id) = updated.group_id.clone() {
            (state.notify)(GroupNotification::TunnelDisconnected {
                group_id,
                tunnel_id: updated.tunnel_id,
            })
            .await;
        }
    }

    // Always reply allow regardless of whether the key was recognised.
    PluginResponse::allow()
}

#[cfg(test)]
mod tests {
    use firefrp_core::{AppCore, CreateCredentialRequest};
    use firefrp_store::Store;

    use super::*;

    fn noop_notify() -> NotifyFn {
        Arc::new(|_event| Box::pin(async {}))
    }

    fn noop_motd_start() -> MotdStartFn {
        Arc::new(|_req| Box::pin(async {}))
    }

    fn noop_motd_cancel() -> MotdCancelFn {
        Arc::new(|_tunnel_id| Box::pin(async {}))
    }

    fn state(dir: &tempfile::TempDir) -> PluginState {
        let credentials = Store::load(dir.path().join("keys.json")).unwrap();
        let audit = Store::load(dir.path().join("audit.json")).unwrap();
        let allocator = firefrp_core::PortAllocator::new(10000, 10002);
        let core = AppCore::new(credentials, audit, allocator, "ff-", firefrp_config::FireFrpConfig::default(), dir.path().join("firefrp.json"));
        PluginState {
            credentials: CredentialService::new(core),
            notify: noop_notify(),
            motd_start: noop_motd_start(),
            motd_cancel: noop_motd_cancel(),
            public_addr: "play.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn login_activates_pending_and_allows() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let created = st
            .credentials
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: Some("g1".to_string()),
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();

        let content = serde_json::json!({
            "run_id": "run-1",
            "metas": { "access_key": created.key },
        });
        let response = handle_login(&st, &content).await;
        assert!(!response.reject);

        let updated = st.credentials.get_by_key(&created.key).await.unwrap();
        assert_eq!(updated.status, CredentialStatus::Active);
    }

    #[tokio::test]
    async fn login_missing_access_key_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let content = serde_json::json!({ "run_id": "run-1", "metas": {} });
        let response = handle_login(&st, &content).await;
        assert!(response.reject);
    }

    #[tokio::test]
    async fn login_unknown_key_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let content = serde_json::json!({ "run_id": "run-1", "metas": { "access_key": "ff-nope" } });
        let response = handle_login(&st, &content).await;
        assert!(response.reject);
    }

    #[tokio::test]
    async fn login_already_active_is_idempotent_allow() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let created = st
            .credentials
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: None,
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();
        st.credentials.activate(&created.key, "run-1").await.unwrap();

        let content = serde_json::json!({ "run_id": "run-2", "metas": { "access_key": created.key } });
        let response = handle_login(&st, &content).await;
        assert!(!response.reject);
    }

    #[tokio::test]
    async fn new_proxy_rejects_mismatched_name() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let created = st
            .credentials
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: None,
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();

        let content = serde_json::json!({
            "user": { "metas": { "access_key": created.key } },
            "proxy_name": "wrong-name",
            "proxy_type": "tcp",
            "remote_port": created.remote_port,
        });
        let response = handle_new_proxy(&st, &content).await;
        assert!(response.reject);
    }

    #[tokio::test]
    async fn new_proxy_allows_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let created = st
            .credentials
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: None,
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();

        let content = serde_json::json!({
            "user": { "metas": { "access_key": created.key } },
            "proxy_name": created.proxy_name,
            "proxy_type": "tcp",
            "remote_port": created.remote_port,
        });
        let response = handle_new_proxy(&st, &content).await;
        assert!(!response.reject);
    }

    #[tokio::test]
    async fn close_proxy_always_allows_and_disconnects_active() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let created = st
            .credentials
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: None,
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();
        st.credentials.activate(&created.key, "run-1").await.unwrap();

        let content = serde_json::json!({
            "user": { "metas": { "access_key": created.key } },
            "proxy_name": created.proxy_name,
        });
        let response = handle_close_proxy(&st, &content).await;
        assert!(!response.reject);

        let updated = st.credentials.get_by_key(&created.key).await.unwrap();
        assert_eq!(updated.status, CredentialStatus::Disconnected);
    }

    #[tokio::test]
    async fn close_proxy_unknown_key_still_allows() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);
        let content = serde_json::json!({
            "user": { "metas": { "access_key": "ff-nope" } },
            "proxy_name": "whatever",
        });
        let response = handle_close_proxy(&st, &content).await;
        assert!(!response.reject);
    }
}
