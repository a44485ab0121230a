use serde::Deserialize;

use crate::error::{FrpsError, Result};

/// Basic-auth client for the frps admin HTTP API (§4.7 last bullet).
///
/// Every request is bounded to 2s, matching §5's latency budget for
/// control-plane calls against the supervised subprocess.
#[derive(Debug, Clone)]
pub struct AdminClient {
    base_url: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "bindPort")]
    pub bind_port: u16,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyInfo {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub today_traffic_in: i64,
    #[serde(default)]
    pub today_traffic_out: i64,
}

impl AdminClient {
    pub fn new(addr: &str, port: u16, user: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .map_err(FrpsError::AdminApi)?;
        Ok(Self {
            base_url: format!("http://{addr}:{port}"),
            user: user.into(),
            password: password.into(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(FrpsError::AdminApi)?
            .error_for_status()
            .map_err(FrpsError::AdminApi)?;
        resp.json::<T>().await.map_err(FrpsError::AdminApi)
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.get_json("/api/serverinfo").await
    }

    pub async fn list_tcp_proxies(&self) -> Result<Vec<ProxyInfo>> {
        #[derive(Deserialize)]
        struct Envelope {
            proxies: Vec<ProxyInfo>,
        }
        let envelope: Envelope = self.get_json("/api/proxy/tcp").await?;
        Ok(envelope.proxies)
    }

    pub async fn get_tcp_proxy(&self, name: &str) -> Result<ProxyInfo> {
        self.get_json(&format!("/api/proxy/tcp/{name}")).await
    }

    pub async fn traffic(&self, name: &str) -> Result<serde_json::Value> {
        self.get_json(&format!("/api/traffic/{name}")).await
    }

    /// Used by the readiness poll (§4.7): any successful response means
    /// frps is up and authenticating admin requests correctly.
    pub async fn is_ready(&self) -> bool {
        self.server_info().await.is_ok()
    }
}
