use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::admin_client::AdminClient;
use crate::binary::{binary_path, ensure_binary};
use crate::config_gen::{render_frps_toml, FrpsConfigInput};
use crate::error::{FrpsError, Result};

const READINESS_POLL_ATTEMPTS: u32 = 30;
const READINESS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const STOP_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);
const MAX_RESTART_DELAY: std::time::Duration = std::time::Duration::from_secs(30);
/// Interval `monitor`'s exit-wait poll sleeps between `try_wait` checks.
/// Short enough that an unexpected exit is noticed promptly, long enough
/// that `status()`/`stop()` are never starved of the lock for more than a
/// fraction of a second.
const MONITOR_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

/// `stopped → starting → running → (error → restarting)`;
/// `running/starting → stopping → stopped` on intentional shutdown (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Error,
    Restarting,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub uptime_ms: Option<i64>,
    pub version: String,
    pub restart_count: u32,
}

struct RunningProcess {
    child: Child,
    started_at: Instant,
}

struct SupervisorInner {
    state: SupervisorState,
    process: Option<RunningProcess>,
    restart_count: u32,
    intentional_stop: bool,
}

/// Supervises the `frps` subprocess: ensures the binary, writes its TOML
/// config, spawns it, polls the admin API for readiness, and restarts it
/// with exponential backoff on unexpected exit (§4.7).
pub struct FrpsSupervisor {
    bin_dir: PathBuf,
    config_path: PathBuf,
    version: String,
    admin_client: AdminClient,
    inner: Mutex<SupervisorInner>,
    restart_notify: Notify,
}

impl FrpsSupervisor {
    pub fn new(bin_dir: PathBuf, config_path: PathBuf, version: impl Into<String>, admin_client: AdminClient) -> Self {
        Self {
            bin_dir,
            config_path,
            version: version.into(),
            admin_client,
            inner: Mutex::new(SupervisorInner {
                state: SupervisorState::Stopped,
                process: None,
                restart_count: 0,
                intentional_stop: false,
            }),
            restart_notify: Notify::new(),
        }
    }

    /// Provisions the binary, writes the config, and spawns frps, waiting
    /// for the admin API to become ready before returning.
    pub async fn start(self: &Arc<Self>, input: &FrpsConfigInput) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.intentional_stop = false;
            inner.state = SupervisorState::Starting;
        }

        let binary = ensure_binary(&self.bin_dir, &self.version).await?;
        self.write_config(input)?;
        self.spawn_and_wait_ready(&binary).await
    }

    fn write_config(&self, input: &FrpsConfigInput) -> Result<()> {
        let toml = render_frps_toml(input);
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FrpsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.config_path, toml).map_err(|source| FrpsError::Io {
            path: self.config_path.clone(),
            source,
        })?;
        firefrp_common::enforce_file_mode(&self.config_path);
        Ok(())
    }

    async fn spawn_and_wait_ready(self: &Arc<Self>, binary: &std::path::Path) -> Result<()> {
        let mut child = Command::new(binary)
            .arg("-c")
            .arg(&self.config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(FrpsError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if let Some(stdout) = stdout {
            tokio::spawn(drain_lines(stdout, "frps:stdout"));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(drain_lines(stderr, "frps:stderr"));
        }

        let pid = child.id();
        {
            let mut inner = self.inner.lock().await;
            inner.process = Some(RunningProcess {
                child,
                started_at: Instant::now(),
            });
        }

        let ready = self.poll_readiness().await;
        if !ready {
            self.kill_inner().await;
            let mut inner = self.inner.lock().await;
            inner.state = SupervisorState::Error;
            return Err(FrpsError::NotReady);
        }

        info!(pid, "frps is ready");
        {
            let mut inner = self.inner.lock().await;
            inner.state = SupervisorState::Running;
            inner.restart_count = 0;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.monitor().await });
        Ok(())
    }

    /// Polls the running child's exit status via `try_wait`, releasing
    /// `inner`'s lock between checks instead of holding it across a
    /// blocking `wait()` for the process's entire lifetime — otherwise
    /// `status()` and `stop()` can't make progress while frps is running.
    /// Returns `None` if there's no process to wait on.
    async fn wait_for_exit(&self) -> Option<std::io::Result<std::process::ExitStatus>> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                match inner.process.as_mut() {
                    Some(proc) => match proc.child.try_wait() {
                        Ok(Some(status)) => return Some(Ok(status)),
                        Ok(None) => {},
                        Err(e) => return Some(Err(e)),
                    },
                    None => return None,
                }
            }
            tokio::time::sleep(MONITOR_POLL_INTERVAL).await;
        }
    }

    async fn poll_readiness(&self) -> bool {
        for attempt in 0..READINESS_POLL_ATTEMPTS {
            if self.admin_client.is_ready().await {
                return true;
            }
            debug!(attempt, "frps not ready yet");
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
        false
    }

    /// Watches the spawned process; on unexpected exit, schedules a
    /// restart with exponential backoff capped at 30s.
    async fn monitor(self: Arc<Self>) {
        loop {
            let exit_status = match self.wait_for_exit().await {
                Some(result) => result,
                None => return,
            };

            let intentional = {
                let inner = self.inner.lock().await;
                inner.intentional_stop
            };
            if intentional {
                let mut inner = self.inner.lock().await;
                inner.state = SupervisorState::Stopped;
                inner.process = None;
                return;
            }

            match exit_status {
                Ok(status) => warn!(?status, "frps exited unexpectedly"),
                Err(e) => error!(error = %e, "error waiting on frps process"),
            }

            let restart_count = {
                let mut inner = self.inner.lock().await;
                inner.state = SupervisorState::Restarting;
                inner.process = None;
                inner.restart_count += 1;
                inner.restart_count
            };

            let delay = restart_delay(restart_count.saturating_sub(1));
            info!(restart_count, delay_ms = delay.as_millis() as u64, "scheduling frps restart");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = self.restart_notify.notified() => {
                    return;
                }
            }

            let still_intentional = {
                let inner = self.inner.lock().await;
                inner.intentional_stop
            };
            if still_intentional {
                return;
            }

            // Restart in place using the already-written config and binary.
            let binary = binary_path(&self.bin_dir);
            let mut child = match Command::new(&binary)
                .arg("-c")
                .arg(&self.config_path)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    error!(error = %e, "failed to respawn frps");
                    let mut inner = self.inner.lock().await;
                    inner.state = SupervisorState::Error;
                    continue;
                },
            };

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(drain_lines(stdout, "frps:stdout"));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(drain_lines(stderr, "frps:stderr"));
            }

            {
                let mut inner = self.inner.lock().await;
                inner.process = Some(RunningProcess {
                    child,
                    started_at: Instant::now(),
                });
            }

            if self.poll_readiness().await {
                let mut inner = self.inner.lock().await;
                inner.state = SupervisorState::Running;
                inner.restart_count = 0;
            } else {
                self.kill_inner().await;
                let mut inner = self.inner.lock().await;
                inner.state = SupervisorState::Error;
            }
        }
    }

    /// Signals SIGTERM, waits up to 10s, then force-kills (§4.7).
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == SupervisorState::Stopped {
                return;
            }
            inner.intentional_stop = true;
            inner.state = SupervisorState::Stopping;
        }
        self.restart_notify.notify_waiters();
        self.kill_inner().await;
        let mut inner = self.inner.lock().await;
        inner.state = SupervisorState::Stopped;
        inner.process = None;
    }

    async fn kill_inner(&self) {
        let pid = {
            let inner = self.inner.lock().await;
            inner.process.as_ref().and_then(|p| p.child.id())
        };
        let Some(pid) = pid else { return };

        send_sigterm(pid);

        let exited = {
            let mut inner = self.inner.lock().await;
            match inner.process.as_mut() {
                Some(proc) => tokio::time::timeout(STOP_GRACE_PERIOD, proc.child.wait()).await.is_ok(),
                None => true,
            }
        };

        if !exited {
            warn!(pid, "frps did not exit within grace period, force-killing");
            let mut inner = self.inner.lock().await;
            if let Some(proc) = inner.process.as_mut() {
                let _ = proc.child.kill().await;
            }
        }
    }

    pub async fn status(&self) -> SupervisorStatus {
        let inner = self.inner.lock().await;
        let (pid, uptime_ms) = match &inner.process {
            Some(p) => (p.child.id(), Some(p.started_at.elapsed().as_millis() as i64)),
            None => (None, None),
        };
        SupervisorStatus {
            state: inner.state,
            pid,
            uptime_ms,
            version: self.version.clone(),
            restart_count: inner.restart_count,
        }
    }
}

fn restart_delay(k: u32) -> std::time::Duration {
    let millis = 1000u64.saturating_mul(1u64 << k.min(5));
    std::time::Duration::from_millis(millis).min(MAX_RESTART_DELAY)
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

async fn drain_lines(reader: impl tokio::io::AsyncRead + Unpin, source: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(source, "{line}"),
            Ok(None) => break,
            Err(e) => {
                warn!(source, error = %e, "error reading frps output");
                break;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_doubles_and_caps_at_30s() {
        assert_eq!(restart_delay(0), std::time::Duration::from_secs(1));
        assert_eq!(restart_delay(1), std::time::Duration::from_secs(2));
        assert_eq!(restart_delay(2), std::time::Duration::from_secs(4));
        assert_eq!(restart_delay(5), std::time::Duration::from_secs(30));
        assert_eq!(restart_delay(10), std::time::Duration::from_secs(30));
    }
}
