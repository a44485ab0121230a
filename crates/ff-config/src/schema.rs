use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Placeholder values shipped in the example config. Config load warns
/// loudly if either is still in effect at startup (§4.2).
pub const INSECURE_AUTH_TOKEN: &str = "changeme-token";
pub const INSECURE_ADMIN_PASSWORD: &str = "changeme-admin";

/// The pinned tunnel-daemon version this build of FireFrp was validated
/// against. Used as the schema default for `frpVersion`.
pub const DEFAULT_FRP_VERSION: &str = "0.61.1";

/// Root config document, matching §4.2's recognised-options table.
///
/// Keys present in the schema but missing from the user's file are filled
/// with these `Default` values; keys present in the file but absent from
/// the schema end up in `deprecated` instead of being dropped (see
/// `loader::merge_known_and_deprecated`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireFrpConfig {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_frp_version")]
    pub frp_version: String,

    #[serde(default)]
    pub server: ServerIdentity,

    #[serde(default)]
    pub frps: FrpsConfig,

    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    #[serde(default = "default_key_ttl_minutes")]
    pub key_ttl_minutes: u32,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub updates: UpdatesConfig,

    #[serde(default)]
    pub bot: BotConfig,

    /// Unknown top-level keys from a previous or foreign config version,
    /// preserved verbatim across load/save cycles rather than discarded.
    #[serde(default)]
    pub deprecated: serde_json::Map<String, serde_json::Value>,
}

impl Default for FireFrpConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            frp_version: default_frp_version(),
            server: ServerIdentity::default(),
            frps: FrpsConfig::default(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            key_ttl_minutes: default_key_ttl_minutes(),
            key_prefix: default_key_prefix(),
            updates: UpdatesConfig::default(),
            bot: BotConfig::default(),
            deprecated: serde_json::Map::new(),
        }
    }
}

impl FireFrpConfig {
    /// Names of every field this schema recognises at the top level, used
    /// by the loader to decide what belongs in `deprecated`.
    pub fn known_top_level_keys() -> BTreeSet<&'static str> {
        [
            "serverPort",
            "frpVersion",
            "server",
            "frps",
            "portRangeStart",
            "portRangeEnd",
            "keyTtlMinutes",
            "keyPrefix",
            "updates",
            "bot",
            "deprecated",
        ]
        .into_iter()
        .collect()
    }

    /// True if either `frps.authToken` or `frps.adminPassword` are still
    /// at their insecure placeholder value.
    pub fn has_insecure_defaults(&self) -> bool {
        self.frps.auth_token == INSECURE_AUTH_TOKEN
            || self.frps.admin_password == INSECURE_ADMIN_PASSWORD
    }
}

fn default_server_port() -> u16 {
    8080
}
fn default_frp_version() -> String {
    DEFAULT_FRP_VERSION.to_string()
}
fn default_port_range_start() -> u16 {
    20000
}
fn default_port_range_end() -> u16 {
    29999
}
fn default_key_ttl_minutes() -> u32 {
    60
}
fn default_key_prefix() -> String {
    "ff-".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdentity {
    #[serde(default = "default_server_id")]
    pub id: String,
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default)]
    pub public_addr: String,
    #[serde(default)]
    pub description: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            id: default_server_id(),
            name: default_server_name(),
            public_addr: String::new(),
            description: String::new(),
        }
    }
}

fn default_server_id() -> String {
    "firefrp-node".to_string()
}
fn default_server_name() -> String {
    "FireFrp".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrpsConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default = "default_auth_token")]
    pub auth_token: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
}

impl Default for FrpsConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_bind_port(),
            auth_token: default_auth_token(),
            admin_addr: default_admin_addr(),
            admin_port: default_admin_port(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_bind_port() -> u16 {
    7000
}
fn default_auth_token() -> String {
    INSECURE_AUTH_TOKEN.to_string()
}
fn default_admin_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_admin_port() -> u16 {
    7400
}
fn default_admin_user() -> String {
    "admin".to_string()
}
fn default_admin_password() -> String {
    INSECURE_ADMIN_PASSWORD.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    Auto,
    Dev,
    Stable,
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateChannel::Auto => "auto",
            UpdateChannel::Dev => "dev",
            UpdateChannel::Stable => "stable",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for UpdateChannel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "dev" => Ok(Self::Dev),
            "stable" => Ok(Self::Stable),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesConfig {
    #[serde(default)]
    pub channel: UpdateChannel,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            channel: UpdateChannel::default(),
            github_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default)]
    pub ws_url: String,
    #[serde(default)]
    pub token: Option<SecretString>,
    #[serde(default)]
    pub self_id: Option<String>,
    #[serde(default)]
    pub broadcast_groups: Vec<String>,
    #[serde(default)]
    pub admin_users: Vec<String>,
    #[serde(default)]
    pub allowed_groups: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            token: None,
            self_id: None,
            broadcast_groups: Vec::new(),
            admin_users: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_flags_insecure_defaults() {
        let config = FireFrpConfig::default();
        assert!(config.has_insecure_defaults());
    }

    #[test]
    fn custom_secrets_are_not_insecure() {
        let mut config = FireFrpConfig::default();
        config.frps.auth_token = "a-real-token".to_string();
        config.frps.admin_password = "a-real-password".to_string();
        assert!(!config.has_insecure_defaults());
    }

    #[test]
    fn update_channel_round_trips_through_str() {
        assert_eq!("stable".parse::<UpdateChannel>(), Ok(UpdateChannel::Stable));
        assert_eq!(UpdateChannel::Stable.to_string(), "stable");
    }
}
