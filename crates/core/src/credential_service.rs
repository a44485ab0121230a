use std::{collections::BTreeSet, sync::Arc};

use firefrp_common::{now_ms, GameType};
use firefrp_config::UpdateChannel;
use firefrp_store::{AuditEntry, AuditEventType, Credential, CredentialStatus};
use rand::RngCore;

use crate::{
    app_core::{AppCore, CoreState},
    error::{CoreError, Result, ValidateError},
};

/// Parameters for [`CredentialService::create`] (§4.4).
#[derive(Debug, Clone)]
pub struct CreateCredentialRequest {
    pub user_id: String,
    pub user_name: String,
    pub group_id: Option<String>,
    pub game_type: GameType,
    pub ttl_minutes: u32,
}

/// The credential lifecycle state machine (§4.4). The only component
/// allowed to mutate `Credential` rows; `PluginHandler`/`BotDispatcher`
/// drive it through this API rather than touching the store directly.
pub struct CredentialService {
    core: Arc<AppCore>,
}

impl CredentialService {
    pub fn new(core: Arc<AppCore>) -> Arc<Self> {
        Arc::new(Self { core })
    }

    /// Allocate a port, generate `key`/`tunnelId`, insert as `pending`, then
    /// patch in the id-derived `proxyName` (§4.4 step 1-4).
    pub async fn create(&self, req: CreateCredentialRequest) -> Result<Credential> {
        let mut state = self.core.state.lock().await;

        let held: BTreeSet<u16> = state
            .credentials
            .filter(|c| c.holds_port())
            .into_iter()
            .map(|c| c.remote_port)
            .collect();
        let port = self.core.allocator.allocate(&held)?;

        let now = now_ms();
        let key = format!("{}{}", self.core.key_prefix, random_hex(16));
        let tunnel_id = format!("T-{}", random_hex(4));

        let draft = Credential {
            id: 0,
            tunnel_id,
            key,
            user_id: req.user_id,
            user_name: req.user_name,
            group_id: req.group_id,
            game_type: req.game_type,
            status: CredentialStatus::Pending,
            remote_port: port,
            proxy_name: String::new(),
            client_id: None,
            created_at: now,
            activated_at: None,
            expires_at: now + i64::from(req.ttl_minutes) * 60_000,
            updated_at: now,
        };
        let inserted = state.credentials.insert(draft)?;

        let proxy_name = format!("ff-{}-{}", inserted.id, req.game_type.abbrev());
        let id = inserted.id;
        let updated = state.credentials.update(id, |c| c.proxy_name = proxy_name.clone())?;

        write_audit(
            &mut state,
            AuditEventType::KeyCreated,
            Some(id),
            serde_json::json!({
                "tunnelId": updated.tunnel_id,
                "userId": updated.user_id,
                "gameType": updated.game_type,
                "remotePort": updated.remote_port,
            }),
        )?;

        Ok(updated)
    }

    /// Pure lookup + status classification. Lazily transitions an expired
    /// `pending` row to `expired` (§4.4) — the only mutation `validate`
    /// ever performs.
    pub async fn validate(&self, key: &str) -> std::result::Result<Credential, ValidateError> {
        let mut state = self.core.state.lock().await;
        let found = state
            .credentials
            .find_by(|c| c.key == key)
            .cloned()
            .ok_or(ValidateError::KeyNotFound)?;

        match found.status {
            CredentialStatus::Pending => {
                if found.expires_at <= now_ms() {
                    lazily_expire(&mut state, &found);
                    return Err(ValidateError::KeyExpired);
                }
                Ok(found)
            },
            CredentialStatus::Active => Err(ValidateError::KeyAlreadyUsed),
            CredentialStatus::Expired => Err(ValidateError::KeyExpired),
            CredentialStatus::Revoked => Err(ValidateError::KeyRevoked),
            CredentialStatus::Disconnected => Err(ValidateError::KeyDisconnected),
        }
    }

    /// Re-reads the record by id to narrow the activation race; only a
    /// still-`pending` row is actually activated (§4.4).
    pub async fn activate(&self, key: &str, client_id: &str) -> Option<Credential> {
        let mut state = self.core.state.lock().await;
        let candidate = state.credentials.find_by(|c| c.key == key).cloned()?;
        if candidate.status != CredentialStatus::Pending {
            return None;
        }
        let current = state.credentials.find_by_id(candidate.id).cloned()?;
        if current.status != CredentialStatus::Pending {
            return None;
        }

        let now = now_ms();
        let client_id = client_id.to_string();
        let updated = state
            .credentials
            .update(current.id, |c| {
                c.status = CredentialStatus::Active;
                c.client_id = Some(client_id.clone());
                c.activated_at = Some(now);
                c.updated_at = now;
            })
            .ok()?;

        let _ = write_audit(
            &mut state,
            AuditEventType::KeyActivated,
            Some(current.id),
            serde_json::json!({ "clientId": updated.client_id }),
        );
        Some(updated)
    }

    pub async fn expire(&self, id: u64) -> Result<Credential> {
        self.terminal_transition_by_id(id, CredentialStatus::Expired, AuditEventType::KeyExpired)
            .await
    }

    pub async fn revoke(&self, id: u64) -> Result<Credential> {
        self.terminal_transition_by_id(id, CredentialStatus::Revoked, AuditEventType::KeyRevoked)
            .await
    }

    /// Guarded `active -> disconnected` transition, driven by the plugin
    /// handler's `CloseProxy` op (§4.4, §4.8).
    pub async fn disconnect(&self, key: &str) -> Result<Credential> {
        let mut state = self.core.state.lock().await;
        let current = state
            .credentials
            .find_by(|c| c.key == key)
            .cloned()
            .ok_or(CoreError::CredentialUnknown)?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let now = now_ms();
        let updated = state.credentials.update(current.id, |c| {
            c.status = CredentialStatus::Disconnected;
            c.updated_at = now;
        })?;
        state.reject_set.add(updated.key.clone(), now);
        write_audit(
            &mut state,
            AuditEventType::KeyDisconnected,
            Some(current.id),
            serde_json::json!({}),
        )?;
        Ok(updated)
    }

    /// Every non-terminal row past its deadline, transitioned to `expired`
    /// and added to the reject set in one pass (§4.6 ExpiryScheduler tick).
    pub async fn run_expiry_tick(&self) -> Vec<Credential> {
        let mut state = self.core.state.lock().await;
        let now = now_ms();
        let due_ids: Vec<u64> = state
            .credentials
            .filter(|c| !c.status.is_terminal() && c.expires_at <= now)
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut expired = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            let Ok(updated) = state.credentials.update(id, |c| {
                c.status = CredentialStatus::Expired;
                c.updated_at = now;
            }) else {
                continue;
            };
            state.reject_set.add(updated.key.clone(), now);
            let _ = write_audit(
                &mut state,
                AuditEventType::KeyExpired,
                Some(id),
                serde_json::json!({ "reason": "scheduled_expiry" }),
            );
            expired.push(updated);
        }
        expired
    }

    pub async fn get_by_key(&self, key: &str) -> Option<Credential> {
        self.core.state.lock().await.credentials.find_by(|c| c.key == key).cloned()
    }

    pub async fn get_by_tunnel_id(&self, tunnel_id: &str) -> Option<Credential> {
        self.core
            .state
            .lock()
            .await
            .credentials
            .find_by(|c| c.tunnel_id == tunnel_id)
            .cloned()
    }

    pub async fn get_active_by_user(&self, user_id: &str) -> Vec<Credential> {
        self.core
            .state
            .lock()
            .await
            .credentials
            .filter(|c| c.user_id == user_id && !c.status.is_terminal())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_active_by_group(&self, group_id: &str) -> Vec<Credential> {
        self.core
            .state
            .lock()
            .await
            .credentials
            .filter(|c| c.group_id.as_deref() == Some(group_id) && !c.status.is_terminal())
            .into_iter()
            .cloned()
            .collect()
    }

    /// `active ∪ pending` (§4.4).
    pub async fn get_all_active(&self) -> Vec<Credential> {
        self.core
            .state
            .lock()
            .await
            .credentials
            .filter(|c| !c.status.is_terminal())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Per-user cap (P9): count of this user's non-terminal credentials.
    pub async fn count_non_terminal_for_user(&self, user_id: &str) -> usize {
        self.get_active_by_user(user_id).await.len()
    }

    /// Audit-only events driven by the plugin handler rather than a status
    /// transition of its own (§3's `proxy_{opened,closed}`/`client_rejected`
    /// event kinds, which have no dedicated state-machine method).
    pub async fn audit_proxy_opened(&self, id: u64) {
        let mut state = self.core.state.lock().await;
        let _ = write_audit(&mut state, AuditEventType::ProxyOpened, Some(id), serde_json::json!({}));
    }

    pub async fn audit_proxy_closed(&self, id: u64) {
        let mut state = self.core.state.lock().await;
        let _ = write_audit(&mut state, AuditEventType::ProxyClosed, Some(id), serde_json::json!({}));
    }

    pub async fn audit_client_rejected(&self, id: Option<u64>, reason: &str) {
        let mut state = self.core.state.lock().await;
        let _ = write_audit(
            &mut state,
            AuditEventType::ClientRejected,
            id,
            serde_json::json!({ "reason": reason }),
        );
    }

    /// Current `bot.allowedGroups` (empty means "all groups allowed", §4.11).
    pub async fn allowed_groups(&self) -> Vec<String> {
        self.core.state.lock().await.config.bot.allowed_groups.clone()
    }

    pub async fn is_group_allowed(&self, group_id: &str) -> bool {
        let groups = self.allowed_groups().await;
        groups.is_empty() || groups.iter().any(|g| g == group_id)
    }

    pub async fn admin_users(&self) -> Vec<String> {
        self.core.state.lock().await.config.bot.admin_users.clone()
    }

    pub async fn broadcast_groups(&self) -> Vec<String> {
        self.core.state.lock().await.config.bot.broadcast_groups.clone()
    }

    pub async fn update_channel(&self) -> UpdateChannel {
        self.core.state.lock().await.config.updates.channel
    }

    /// Snapshot of the whole config, for read-only reporting (`server`
    /// command, ClientAPI's `/server-info`). Cheap in-memory clone under
    /// the lock, not a network/disk read, so it doesn't violate §5's
    /// "release the lock before I/O" rule.
    pub async fn config_snapshot(&self) -> firefrp_config::FireFrpConfig {
        self.core.state.lock().await.config.clone()
    }

    /// Add `group` to `bot.allowedGroups` and persist; rolls the in-memory
    /// copy back if the write fails (§4.11's "rollback in-memory on
    /// persistence failure").
    pub async fn add_allowed_group(&self, group: String) -> Result<bool> {
        self.mutate_config_persisted(|config| {
            if config.bot.allowed_groups.iter().any(|g| g == &group) {
                false
            } else {
                config.bot.allowed_groups.push(group);
                true
            }
        })
        .await
    }

    pub async fn remove_allowed_group(&self, group: &str) -> Result<bool> {
        self.mutate_config_persisted(|config| {
            let before = config.bot.allowed_groups.len();
            config.bot.allowed_groups.retain(|g| g != group);
            config.bot.allowed_groups.len() != before
        })
        .await
    }

    pub async fn set_update_channel(&self, channel: UpdateChannel) -> Result<()> {
        self.mutate_config_persisted(|config| {
            config.updates.channel = channel;
        })
        .await
    }

    /// Apply `mutate` to the in-memory config, persist to disk, and roll
    /// back the in-memory copy if persistence fails.
    async fn mutate_config_persisted<T>(
        &self,
        mutate: impl FnOnce(&mut firefrp_config::FireFrpConfig) -> T,
    ) -> Result<T> {
        let mut state = self.core.state.lock().await;
        let before = state.config.clone();
        let outcome = mutate(&mut state.config);
        if let Err(err) = firefrp_config::save_config_to(&state.config, &self.core.config_path) {
            state.config = before;
            return Err(err.into());
        }
        Ok(outcome)
    }

    pub async fn reject_contains(&self, key: &str) -> bool {
        self.core.state.lock().await.reject_set.contains(key)
    }

    pub async fn reject_add(&self, key: impl Into<String>, terminal_at_ms: i64) {
        self.core.state.lock().await.reject_set.add(key, terminal_at_ms);
    }

    /// Walk the store at startup and re-add keys whose terminal status was
    /// entered within `horizon_ms` (§4.5, §4.14 step 5).
    pub async fn rebuild_reject_set(&self, horizon_ms: i64) {
        let mut state = self.core.state.lock().await;
        let now = now_ms();
        let rebuilt = crate::reject_set::RejectSet::rebuild_from(&state.credentials, horizon_ms, now);
        state.reject_set = rebuilt;
    }

    pub async fn prune_reject_set(&self, horizon_ms: i64) {
        let mut state = self.core.state.lock().await;
        let now = now_ms();
        state.reject_set.prune(horizon_ms, now);
    }

    /// Test-only hook: force a row's `expiresAt` without going through a
    /// public transition, so other crates' tests can set up an
    /// already-due credential without reaching into private state.
    #[cfg(test)]
    pub(crate) async fn test_force_expires_at(&self, id: u64, expires_at: i64) {
        let mut state = self.core.state.lock().await;
        let _ = state.credentials.update(id, |c| c.expires_at = expires_at);
    }

    async fn terminal_transition_by_id(
        &self,
        id: u64,
        target: CredentialStatus,
        event: AuditEventType,
    ) -> Result<Credential> {
        let mut state = self.core.state.lock().await;
        let current = state
            .credentials
            .find_by_id(id)
            .cloned()
            .ok_or(CoreError::CredentialUnknown)?;
        if current.status.is_terminal() {
            return Ok(current);
        }

        let now = now_ms();
        let updated = state.credentials.update(id, |c| {
            c.status = target;
            c.updated_at = now;
        })?;
        state.reject_set.add(updated.key.clone(), now);
        write_audit(&mut state, event, Some(id), serde_json::json!({}))?;
        Ok(updated)
    }
}

fn lazily_expire(state: &mut CoreState, found: &Credential) {
    let now = now_ms();
    if let Ok(updated) = state.credentials.update(found.id, |c| {
        c.status = CredentialStatus::Expired;
        c.updated_at = now;
    }) {
        state.reject_set.add(updated.key.clone(), now);
    }
    let _ = write_audit(
        state,
        AuditEventType::KeyExpired,
        Some(found.id),
        serde_json::json!({ "reason": "expired_on_validate" }),
    );
}

fn write_audit(
    state: &mut CoreState,
    event_type: AuditEventType,
    key_id: Option<u64>,
    details: serde_json::Value,
) -> Result<()> {
    state.audit.insert(AuditEntry {
        id: 0,
        event_type,
        key_id,
        details,
        created_at: now_ms(),
    })?;
    Ok(())
}

/// `n_bytes` of CSPRNG output, hex-encoded — used for `key` (16 bytes =
/// 128 bits) and `tunnelId` (4 bytes = 8 hex chars) per §3.
fn random_hex(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use firefrp_store::Store;

    use super::*;
    use crate::port_allocator::PortAllocator;

    fn service(dir: &tempfile::TempDir) -> Arc<CredentialService> {
        let credentials = Store::load(dir.path().join("keys.json")).unwrap();
        let audit = Store::load(dir.path().join("audit.json")).unwrap();
        let allocator = PortAllocator::new(10000, 10002);
        let core = AppCore::new(credentials, audit, allocator, "ff-", firefrp_config::FireFrpConfig::default(), dir.path().join("firefrp.json"));
        CredentialService::new(core)
    }

    fn request(user: &str) -> CreateCredentialRequest {
        CreateCredentialRequest {
            user_id: user.to_string(),
            user_name: "Alice".to_string(),
            group_id: Some("g1".to_string()),
            game_type: GameType::Minecraft,
            ttl_minutes: 60,
        }
    }

    #[tokio::test]
    async fn create_then_validate_then_activate() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        let created = svc.create(request("u1")).await.unwrap();
        assert_eq!(created.status, CredentialStatus::Pending);
        assert!(created.proxy_name.starts_with("ff-"));
        assert!(created.proxy_name.ends_with("-mine"));

        let validated = svc.validate(&created.key).await.unwrap();
        assert_eq!(validated.id, created.id);

        let activated = svc.activate(&created.key, "run-1").await.unwrap();
        assert_eq!(activated.status, CredentialStatus::Active);
        assert_eq!(activated.client_id.as_deref(), Some("run-1"));

        assert_eq!(
            svc.validate(&created.key).await,
            Err(ValidateError::KeyAlreadyUsed)
        );
    }

    #[tokio::test]
    async fn pool_exhaustion_creates_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        svc.create(request("u1")).await.unwrap();
        svc.create(request("u2")).await.unwrap();
        svc.create(request("u3")).await.unwrap();

        assert!(matches!(
            svc.create(request("u4")).await,
            Err(CoreError::PoolExhausted)
        ));
        assert_eq!(svc.get_all_active().await.len(), 3);
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        let created = svc.create(request("u1")).await.unwrap();
        svc.activate(&created.key, "run-1").await.unwrap();

        let disconnected = svc.disconnect(&created.key).await.unwrap();
        assert_eq!(disconnected.status, CredentialStatus::Disconnected);
        assert!(svc.reject_contains(&created.key).await);

        // Idempotent: disconnecting an already-terminal credential is a
        // no-op, not an error.
        let again = svc.disconnect(&created.key).await.unwrap();
        assert_eq!(again.status, CredentialStatus::Disconnected);
    }

    #[tokio::test]
    async fn expiry_tick_transitions_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        let mut req = request("u1");
        req.ttl_minutes = 0;
        let created = svc.create(req).await.unwrap();
        // ttl_minutes = 0 still leaves expires_at == created_at; force past.
        svc.test_force_expires_at(created.id, now_ms() - 1).await;

        let expired = svc.run_expiry_tick().await;
        assert_eq!(expired.len(), 1);
        assert!(svc.reject_contains(&created.key).await);
    }

    #[tokio::test]
    async fn allowed_groups_add_and_remove_persist_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        assert!(svc.is_group_allowed("any-group").await);

        assert!(svc.add_allowed_group("g1".to_string()).await.unwrap());
        assert!(!svc.add_allowed_group("g1".to_string()).await.unwrap());
        assert_eq!(svc.allowed_groups().await, vec!["g1".to_string()]);
        assert!(svc.is_group_allowed("g1").await);
        assert!(!svc.is_group_allowed("g2").await);

        let reloaded = firefrp_config::load_config(&dir.path().join("firefrp.json")).unwrap();
        assert_eq!(reloaded.bot.allowed_groups, vec!["g1".to_string()]);

        assert!(svc.remove_allowed_group("g1").await.unwrap());
        assert!(svc.is_group_allowed("anything").await);
    }

    #[tokio::test]
    async fn set_update_channel_persists() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        svc.set_update_channel(UpdateChannel::Stable).await.unwrap();
        assert_eq!(svc.update_channel().await, UpdateChannel::Stable);

        let reloaded = firefrp_config::load_config(&dir.path().join("firefrp.json")).unwrap();
        assert_eq!(reloaded.updates.channel, UpdateChannel::Stable);
    }
}
