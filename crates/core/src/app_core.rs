use std::path::PathBuf;
use std::sync::Arc;

use firefrp_config::FireFrpConfig;
use firefrp_store::{AuditEntry, Credential, Store};
use tokio::sync::Mutex;

use crate::{port_allocator::PortAllocator, reject_set::RejectSet};

/// Everything a credential decision needs to read or mutate in one
/// atomic step, bundled behind a single mutex (§5: "a single state-mutex
/// ... guards the composite state"). `CredentialService` is the only
/// public handle onto it; nothing else is allowed to reach in directly
/// (see §3's "Lifecycle ownership").
///
/// `config` is the mutable slice of [`FireFrpConfig`] that admin bot
/// commands change at runtime (`bot.allowedGroups`, `updates.channel`);
/// it rides in the same mutex as the rest of the composite state per §5,
/// generalising `CronService`'s single `RwLock<Vec<CronJob>>` in
/// `crates/cron/src/service.rs` to several collaborating pieces of state.
pub(crate) struct CoreState {
    pub credentials: Store<Credential>,
    pub audit: Store<AuditEntry>,
    pub reject_set: RejectSet,
    pub config: FireFrpConfig,
}

/// The single-writer composite state for the credential lifecycle.
///
/// Grounded on `CronService`'s pattern of bundling mutable state behind one
/// lock and exposing async methods that take/release it internally, rather
/// than handing the lock itself to callers.
pub struct AppCore {
    pub(crate) state: Mutex<CoreState>,
    pub(crate) allocator: PortAllocator,
    pub(crate) key_prefix: String,
    pub(crate) config_path: PathBuf,
}

impl AppCore {
    pub fn new(
        credentials: Store<Credential>,
        audit: Store<AuditEntry>,
        allocator: PortAllocator,
        key_prefix: impl Into<String>,
        config: FireFrpConfig,
        config_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoreState {
                credentials,
                audit,
                reject_set: RejectSet::new(),
                config,
            }),
            allocator,
            key_prefix: key_prefix.into(),
            config_path,
        })
    }
}
