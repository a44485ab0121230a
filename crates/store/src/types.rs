use firefrp_common::GameType;
use serde::{Deserialize, Serialize};

use crate::store::Identified;

/// `status` transitions only along `pending→{active, expired, revoked}`,
/// `active→{expired, revoked, disconnected}`; the three terminal variants
/// are sinks (I3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Pending,
    Active,
    Expired,
    Revoked,
    Disconnected,
}

impl CredentialStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CredentialStatus::Expired | CredentialStatus::Revoked | CredentialStatus::Disconnected
        )
    }

    /// Whether `next` is a legal successor of `self` under I3.
    pub fn can_transition_to(self, next: CredentialStatus) -> bool {
        use CredentialStatus::*;
        matches!(
            (self, next),
            (Pending, Active) | (Pending, Expired) | (Pending, Revoked)
                | (Active, Expired) | (Active, Revoked) | (Active, Disconnected)
        )
    }
}

/// The central record (§3). One row per issued access key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: u64,
    pub tunnel_id: String,
    pub key: String,
    pub user_id: String,
    pub user_name: String,
    pub group_id: Option<String>,
    pub game_type: GameType,
    pub status: CredentialStatus,
    pub remote_port: u16,
    pub proxy_name: String,
    pub client_id: Option<String>,
    pub created_at: i64,
    pub activated_at: Option<i64>,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl Identified for Credential {
    fn id(&self) -> u64 {
        self.id
    }
    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Credential {
    /// A credential holds its `remotePort` only while in `pending`/`active`
    /// (I2); terminal rows retain the value for forensics but no longer
    /// "hold" the port for allocation purposes.
    pub fn holds_port(&self) -> bool {
        matches!(
            self.status,
            CredentialStatus::Pending | CredentialStatus::Active
        )
    }
}

/// Event kinds recorded in the append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KeyCreated,
    KeyActivated,
    KeyExpired,
    KeyRevoked,
    KeyDisconnected,
    ProxyOpened,
    ProxyClosed,
    ClientRejected,
}

/// `{id, eventType, keyId?, details, createdAt}` (§3). Append-only; `id`
/// is monotonic (I7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: u64,
    pub event_type: AuditEventType,
    pub key_id: Option<u64>,
    pub details: serde_json::Value,
    pub created_at: i64,
}

impl Identified for AuditEntry {
    fn id(&self) -> u64 {
        self.id
    }
    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_i3() {
        use CredentialStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Expired));
        assert!(Active.can_transition_to(Disconnected));
        assert!(!Pending.can_transition_to(Disconnected));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Disconnected.can_transition_to(Revoked));
    }

    #[test]
    fn terminal_states_are_sinks() {
        assert!(CredentialStatus::Expired.is_terminal());
        assert!(CredentialStatus::Revoked.is_terminal());
        assert!(CredentialStatus::Disconnected.is_terminal());
        assert!(!CredentialStatus::Pending.is_terminal());
        assert!(!CredentialStatus::Active.is_terminal());
    }
}
