use std::collections::HashMap;
use std::sync::Arc;

use firefrp_common::notify::{GroupNotification, MotdCancelFn, MotdStartFn, MotdStartRequest, NotifyFn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::slp::fetch_status;

/// Absolute offsets from tunnel activation at which each probe attempt
/// fires (§4.13). Five attempts total; the clock starts at activation, not
/// at the previous attempt's completion, so these are measured from a
/// single `started_at` instant rather than slept sequentially.
const PROBE_OFFSETS: [std::time::Duration; 5] = [
    std::time::Duration::from_secs(15),
    std::time::Duration::from_secs(60),
    std::time::Duration::from_secs(180),
    std::time::Duration::from_secs(300),
    std::time::Duration::from_secs(600),
];

/// Schedules and tracks the per-tunnel probe timers described in §4.13.
/// Starting a tunnel that already has a running probe replaces it; the new
/// schedule always wins.
pub struct MotdProbe {
    notify: NotifyFn,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MotdProbe {
    pub fn new(notify: NotifyFn) -> Arc<Self> {
        Arc::new(Self { notify, tasks: Mutex::new(HashMap::new()) })
    }

    /// Schedules the five-attempt probe sequence for a newly activated
    /// tunnel. Any existing schedule for the same tunnel is canceled first.
    pub async fn start(self: &Arc<Self>, req: MotdStartRequest) {
        self.cancel(&req.tunnel_id).await;

        let this = Arc::clone(self);
        let tunnel_id = req.tunnel_id.clone();
        let handle = tokio::spawn(async move { this.run(req).await });

        self.tasks.lock().await.insert(tunnel_id, handle);
    }

    async fn run(self: Arc<Self>, req: MotdStartRequest) {
        let started_at = tokio::time::Instant::now();
        for offset in PROBE_OFFSETS {
            let target = started_at + offset;
            tokio::time::sleep_until(target).await;

            match fetch_status(&req.public_addr, req.remote_port).await {
                Ok(status) => {
                    debug!(tunnel_id = %req.tunnel_id, "motd probe succeeded");
                    (self.notify)(GroupNotification::MotdSuccess {
                        group_id: req.group_id.clone().unwrap_or_default(),
                        tunnel_id: req.tunnel_id.clone(),
                        motd: status.motd,
                        online: status.online,
                        max: status.max,
                        version: status.version,
                    })
                    .await;
                    self.tasks.lock().await.remove(&req.tunnel_id);
                    return;
                },
                Err(e) => {
                    debug!(tunnel_id = %req.tunnel_id, error = %e, "motd probe attempt failed");
                },
            }
        }

        (self.notify)(GroupNotification::MotdFailed {
            group_id: req.group_id.clone().unwrap_or_default(),
            tunnel_id: req.tunnel_id.clone(),
        })
        .await;
        self.tasks.lock().await.remove(&req.tunnel_id);
    }

    /// Cancels the pending schedule for a single tunnel, if any (called on
    /// disconnect).
    pub async fn cancel(&self, tunnel_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(tunnel_id) {
            handle.abort();
        }
    }

    /// Cancels every pending schedule (called at shutdown).
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Adapts this scheduler into the injected [`MotdStartFn`] callback
    /// shape used by the plugin handler, avoiding a direct crate dependency.
    pub fn as_start_fn(self: &Arc<Self>) -> MotdStartFn {
        let this = Arc::clone(self);
        Arc::new(move |req: MotdStartRequest| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.start(req).await })
        })
    }

    /// Adapts this scheduler into the injected [`MotdCancelFn`] callback
    /// shape used by the plugin handler.
    pub fn as_cancel_fn(self: &Arc<Self>) -> MotdCancelFn {
        let this = Arc::clone(self);
        Arc::new(move |tunnel_id: String| {
            let this = Arc::clone(&this);
            Box::pin(async move { this.cancel(&tunnel_id).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_notify() -> (NotifyFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let notify: NotifyFn = Arc::new(move |_event| {
            let counted = Arc::clone(&counted);
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        });
        (notify, count)
    }

    #[tokio::test]
    async fn cancel_removes_pending_task_without_notifying() {
        let (notify, count) = counting_notify();
        let probe = MotdProbe::new(notify);

        probe
            .start(MotdStartRequest {
                tunnel_id: "t1".to_string(),
                group_id: Some("g1".to_string()),
                public_addr: "127.0.0.1".to_string(),
                remote_port: 25565,
            })
            .await;

        probe.cancel("t1").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(probe.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_clears_every_tunnel() {
        let (notify, _count) = counting_notify();
        let probe = MotdProbe::new(notify);

        for tunnel_id in ["a", "b", "c"] {
            probe
                .start(MotdStartRequest {
                    tunnel_id: tunnel_id.to_string(),
                    group_id: None,
                    public_addr: "127.0.0.1".to_string(),
                    remote_port: 25565,
                })
                .await;
        }

        probe.cancel_all().await;
        assert!(probe.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn starting_twice_for_same_tunnel_replaces_the_schedule() {
        let (notify, _count) = counting_notify();
        let probe = MotdProbe::new(notify);

        probe
            .start(MotdStartRequest {
                tunnel_id: "t1".to_string(),
                group_id: None,
                public_addr: "127.0.0.1".to_string(),
                remote_port: 25565,
            })
            .await;
        let first_handle_present = probe.tasks.lock().await.contains_key("t1");
        assert!(first_handle_present);

        probe
            .start(MotdStartRequest {
                tunnel_id: "t1".to_string(),
                group_id: None,
                public_addr: "127.0.0.1".to_string(),
                remote_port: 25566,
            })
            .await;

        assert_eq!(probe.tasks.lock().await.len(), 1);
    }
}
