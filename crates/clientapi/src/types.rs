use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateData {
    pub frps_addr: String,
    pub frps_port: u16,
    pub remote_port: u16,
    pub token: String,
    pub proxy_name: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ServerInfoData {
    pub id: String,
    pub name: String,
    pub public_addr: String,
    pub description: String,
    pub client_version: String,
    pub update_channel: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: i64,
}

/// Error codes named in §4.9's mapping table.
pub const KEY_NOT_FOUND: &str = "KEY_NOT_FOUND";
pub const KEY_EXPIRED: &str = "KEY_EXPIRED";
pub const KEY_ALREADY_USED: &str = "KEY_ALREADY_USED";
pub const KEY_REVOKED: &str = "KEY_REVOKED";
pub const KEY_DISCONNECTED: &str = "KEY_DISCONNECTED";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
