use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The frps HTTP plugin envelope (§4.8): `{version, op, content}`.
#[derive(Debug, Deserialize)]
pub struct PluginRequest {
    #[allow(dead_code)]
    pub version: String,
    pub op: String,
    pub content: serde_json::Value,
}

/// The frps HTTP plugin reply. `unchange: true` signals "no modification
/// to the request", frps's spelling for an unconditional allow.
#[derive(Debug, Serialize)]
pub struct PluginResponse {
    pub reject: bool,
    pub reject_reason: String,
    pub unchange: bool,
}

impl PluginResponse {
    pub fn allow() -> Self {
        Self {
            reject: false,
            reject_reason: String::new(),
            unchange: true,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            reject: true,
            reject_reason: reason.into(),
            unchange: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserMetas {
    #[serde(default)]
    pub metas: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginContent {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub metas: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewProxyContent {
    #[serde(default)]
    pub user: UserMetas,
    #[serde(default)]
    pub proxy_name: String,
    #[serde(default)]
    pub proxy_type: String,
    #[serde(default)]
    pub remote_port: u16,
}

#[derive(Debug, Default, Deserialize)]
pub struct PingContent {
    #[serde(default)]
    pub user: UserMetas,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloseProxyContent {
    #[serde(default)]
    pub user: UserMetas,
    #[serde(default)]
    pub proxy_name: String,
}
