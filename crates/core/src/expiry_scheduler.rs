use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};

use crate::credential_service::CredentialService;

/// Fixed tick period (§4.6): "A periodic task with fixed period (30s) and
/// an immediate first tick."
const TICK_PERIOD: Duration = Duration::from_secs(30);

/// Periodic scan that transitions past-deadline credentials to `expired`
/// and feeds the reject set (§4.6).
///
/// Grounded on `CronService`'s timer loop: an `Arc<Notify>` wake used to
/// cut a sleep short on stop, a `RwLock<bool>` running flag checked on
/// both sides of the tick, and a `Mutex<Option<JoinHandle<()>>>` handle
/// joined (not aborted) on stop so an in-flight tick finishes cleanly.
pub struct ExpiryScheduler {
    service: Arc<CredentialService>,
    running: RwLock<bool>,
    wake: Arc<Notify>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    period: Duration,
}

impl ExpiryScheduler {
    pub fn new(service: Arc<CredentialService>) -> Arc<Self> {
        Self::with_period(service, TICK_PERIOD)
    }

    pub fn with_period(service: Arc<CredentialService>, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            service,
            running: RwLock::new(false),
            wake: Arc::new(Notify::new()),
            handle: Mutex::new(None),
            period,
        })
    }

    pub async fn start(self: &Arc<Self>) {
        *self.running.write().await = true;
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.run_loop().await;
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Cancels the timer and joins the in-flight iteration, per §4.6.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake.notify_one();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }
            self.tick().await;
            if !*self.running.read().await {
                break;
            }

            let wake = Arc::clone(&self.wake);
            tokio::select! {
                () = tokio::time::sleep(self.period) => {},
                () = wake.notified() => {},
            }
        }
        debug!("expiry scheduler stopped");
    }

    /// One iteration. Errors inside a single tick never prevent the next
    /// one — `run_expiry_tick` already swallows per-row store failures
    /// rather than aborting the scan (§4.6).
    async fn tick(&self) {
        let expired = self.service.run_expiry_tick().await;
        if !expired.is_empty() {
            for credential in &expired {
                warn!(
                    tunnel_id = %credential.tunnel_id,
                    key_prefix = %firefrp_common::redact_key(&credential.key),
                    "credential expired"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use firefrp_common::GameType;
    use firefrp_store::{CredentialStatus, Store};

    use super::*;
    use crate::{
        app_core::AppCore, credential_service::CreateCredentialRequest, port_allocator::PortAllocator,
    };

    #[tokio::test]
    async fn tick_expires_past_deadline_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Store::load(dir.path().join("keys.json")).unwrap();
        let audit = Store::load(dir.path().join("audit.json")).unwrap();
        let core = AppCore::new(credentials, audit, PortAllocator::new(10000, 10010), "ff-", firefrp_config::FireFrpConfig::default(), dir.path().join("firefrp.json"));
        let service = CredentialService::new(core);

        let created = service
            .create(CreateCredentialRequest {
                user_id: "u1".to_string(),
                user_name: "Alice".to_string(),
                group_id: None,
                game_type: GameType::Minecraft,
                ttl_minutes: 60,
            })
            .await
            .unwrap();
        service.activate(&created.key, "run-1").await.unwrap();

        let scheduler = ExpiryScheduler::with_period(Arc::clone(&service), Duration::from_millis(20));
        // Force the credential past its deadline before the scheduler's
        // first tick runs.
        service.test_force_expires_at(created.id, 0).await;

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;

        let record = service.get_by_key(&created.key).await.unwrap();
        assert_eq!(record.status, CredentialStatus::Expired);
        assert!(service.reject_contains(&created.key).await);
    }
}
