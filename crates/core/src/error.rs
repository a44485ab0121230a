/// Design-level error taxonomy for the credential state machine (§7).
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("no free port available in the configured range")]
    PoolExhausted,

    #[error("credential not found")]
    CredentialUnknown,

    #[error(transparent)]
    Store(#[from] firefrp_store::StoreError),

    #[error(transparent)]
    ConfigPersist(#[from] firefrp_config::ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Outcome of [`crate::credential_service::CredentialService::validate`].
///
/// Mapped 1:1 onto the ClientAPI error codes in §6.1 by the `clientapi`
/// crate; kept here rather than as plain `CoreError` variants because only
/// `validate` produces this exact set and §9's second open question pins
/// `validate` to report `active` as `KeyAlreadyUsed` rather than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateError {
    KeyNotFound,
    KeyExpired,
    KeyAlreadyUsed,
    KeyRevoked,
    KeyDisconnected,
}
